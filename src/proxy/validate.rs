//! Inbound payload validation.
//!
//! Turns a raw `/chat` body into a [`ChatPayload`] or a
//! [`Error::Validation`]. Nothing here touches the network.

use serde_json::Value;

use super::types::{ChatPayload, ChatRequest, Turn};
use crate::error::{Error, Result};

/// Validate a raw `/chat` payload.
///
/// Accepts `{ "message": "..." }` or `{ "messages": [{ "role", "content" }] }`
/// plus the optional `stream` flag and `models` list. `messages` wins when
/// both are present.
pub fn validate_payload(raw: &[u8], max_bytes: usize) -> Result<ChatPayload> {
    if raw.len() > max_bytes {
        return Err(Error::Validation(format!(
            "payload exceeds {} bytes",
            max_bytes
        )));
    }

    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| Error::Validation(format!("body is not valid JSON: {}", e)))?;
    let body = value
        .as_object()
        .ok_or_else(|| Error::Validation("body must be a JSON object".to_string()))?;

    let request = match body.get("messages").filter(|v| !v.is_null()) {
        Some(messages) => ChatRequest::Turns(parse_turns(messages)?),
        None => ChatRequest::Message(parse_message(body.get("message"))?),
    };

    let stream = match body.get("stream") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err(Error::Validation("stream must be a boolean".to_string())),
    };

    let models = match body.get("models") {
        None | Some(Value::Null) => None,
        Some(models) => Some(parse_models(models)?),
    };

    Ok(ChatPayload {
        request,
        stream,
        models,
    })
}

fn parse_message(value: Option<&Value>) -> Result<String> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Ok(text.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(Error::Validation("message is empty".to_string()))
        }
        Some(_) => Err(Error::Validation("message must be a string".to_string())),
    }
}

fn parse_turns(value: &Value) -> Result<Vec<Turn>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::Validation("messages must be an ordered list".to_string()))?;

    if items.is_empty() {
        return Err(Error::Validation("messages is empty".to_string()));
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<Turn>(item.clone())
                .map_err(|e| Error::Validation(format!("messages[{}] is invalid: {}", i, e)))
        })
        .collect()
}

fn parse_models(value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::Validation("models must be a list of model names".to_string()))?;

    if items.is_empty() {
        return Err(Error::Validation("models is empty".to_string()));
    }

    items
        .iter()
        .map(|item| match item.as_str() {
            Some(name) if !name.trim().is_empty() => Ok(name.to_string()),
            _ => Err(Error::Validation(
                "models entries must be non-empty strings".to_string(),
            )),
        })
        .collect()
}
