//! Inbound chat request and upstream request body types.

use serde::{Deserialize, Serialize};

use crate::config::RequestShape;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// A validated chat request: one message or an ordered list of turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRequest {
    Message(String),
    Turns(Vec<Turn>),
}

impl ChatRequest {
    /// Kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatRequest::Message(_) => "message",
            ChatRequest::Turns(_) => "turns",
        }
    }

    /// Flatten into one prompt string.
    ///
    /// A lone message, or a lone user turn, is passed through as-is. Longer
    /// conversations are rendered one `role: content` line per turn.
    pub fn to_prompt(&self) -> String {
        match self {
            ChatRequest::Message(text) => text.clone(),
            ChatRequest::Turns(turns) => match turns.as_slice() {
                [only] if only.role == Role::User => only.content.clone(),
                _ => turns
                    .iter()
                    .map(|t| format!("{}: {}", t.role.as_str(), t.content))
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
        }
    }

    /// Expand into a turn list; a single message becomes one user turn.
    pub fn to_turns(&self) -> Vec<Turn> {
        match self {
            ChatRequest::Message(text) => vec![Turn {
                role: Role::User,
                content: text.clone(),
            }],
            ChatRequest::Turns(turns) => turns.clone(),
        }
    }
}

/// Inbound `/chat` payload as validated by [`crate::proxy::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub request: ChatRequest,
    /// Explicit streaming preference from the body, if given.
    pub stream: Option<bool>,
    /// Caller-supplied candidate models, if given.
    pub models: Option<Vec<String>>,
}

/// Prompt-shaped upstream body.
#[derive(Debug, Clone, Serialize)]
pub struct PromptBody<'a> {
    pub model: &'a str,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Conversation-shaped upstream body.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationBody<'a> {
    pub model: &'a str,
    pub messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Outbound request body, serialized without a wrapper tag.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UpstreamBody<'a> {
    Prompt(PromptBody<'a>),
    Conversation(ConversationBody<'a>),
}

impl<'a> UpstreamBody<'a> {
    /// Build the body for one candidate attempt.
    ///
    /// `stream` is only serialized when streaming is requested.
    pub fn build(shape: RequestShape, model: &'a str, request: &ChatRequest, stream: bool) -> Self {
        let stream = stream.then_some(true);
        match shape {
            RequestShape::Prompt => UpstreamBody::Prompt(PromptBody {
                model,
                input: request.to_prompt(),
                stream,
            }),
            RequestShape::Conversation => UpstreamBody::Conversation(ConversationBody {
                model,
                messages: request.to_turns(),
                stream,
            }),
        }
    }
}

/// Batch reply returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatReply {
    pub reply: String,
}
