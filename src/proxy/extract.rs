//! Known upstream response shapes and ordered text extraction.
//!
//! Upstreams disagree on where generated text lives. Each place we know about
//! is a [`ResponseShape`]; callers walk an ordered slice of shapes and take
//! the first non-empty hit.

use serde_json::Value;

/// A JSON location that may carry generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"output_text": "..."}`
    OutputText,
    /// `{"delta": {"content": "..."}}`
    DeltaContent,
    /// `{"output": [{"content": "..." | [{"text": "..."}, ...]}]}`
    OutputContent,
    /// `{"choices": [{"message": {"content": "..."}}]}`
    ChoicesMessage,
    /// `{"choices": [{"delta": {"content": "..."}}]}`
    ChoicesDelta,
    /// `{"choices": [{"text": "..."}]}`
    ChoicesText,
    /// `{"type": "response.output_text.delta", "delta": "..."}`
    DeltaText,
}

/// Priority order for one decoded stream record.
pub const STREAM_SHAPES: &[ResponseShape] = &[
    ResponseShape::DeltaContent,
    ResponseShape::OutputContent,
    ResponseShape::ChoicesDelta,
    ResponseShape::ChoicesText,
    ResponseShape::DeltaText,
];

/// Priority order for a complete batch body.
pub const BATCH_SHAPES: &[ResponseShape] = &[
    ResponseShape::OutputText,
    ResponseShape::OutputContent,
    ResponseShape::DeltaContent,
    ResponseShape::ChoicesMessage,
    ResponseShape::ChoicesDelta,
    ResponseShape::ChoicesText,
];

impl ResponseShape {
    /// Text at this shape's location, if present and non-empty.
    pub fn extract(self, value: &Value) -> Option<String> {
        let text = match self {
            ResponseShape::OutputText => value.get("output_text").and_then(string),
            ResponseShape::DeltaContent => value
                .get("delta")
                .and_then(|d| d.get("content"))
                .and_then(string),
            ResponseShape::OutputContent => value
                .get("output")
                .and_then(|o| o.get(0))
                .and_then(|o| o.get("content"))
                .and_then(content_text),
            ResponseShape::ChoicesMessage => first_choice(value)
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(string),
            ResponseShape::ChoicesDelta => first_choice(value)
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(string),
            ResponseShape::ChoicesText => first_choice(value)
                .and_then(|c| c.get("text"))
                .and_then(string),
            ResponseShape::DeltaText => value.get("delta").and_then(string),
        };

        text.filter(|t| !t.is_empty())
    }
}

/// Try `shapes` in order and return the first non-empty text with its shape.
pub fn extract_text(value: &Value, shapes: &[ResponseShape]) -> Option<(ResponseShape, String)> {
    shapes
        .iter()
        .find_map(|shape| shape.extract(value).map(|text| (*shape, text)))
}

fn first_choice(value: &Value) -> Option<&Value> {
    value.get("choices").and_then(|c| c.get(0))
}

fn string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Content that is a plain string or a list of `{ "text": ... }` fragments.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_text_wins_for_batch() {
        let body = json!({"output_text": "hi there", "choices": [{"text": "other"}]});
        assert_eq!(
            extract_text(&body, BATCH_SHAPES),
            Some((ResponseShape::OutputText, "hi there".to_string()))
        );
    }

    #[test]
    fn output_content_fragments_are_concatenated() {
        let body = json!({"output": [{"content": [
            {"type": "output_text", "text": "Hel"},
            {"type": "output_text", "text": "lo"},
            {"type": "refusal"}
        ]}]});
        assert_eq!(
            ResponseShape::OutputContent.extract(&body),
            Some("Hello".to_string())
        );
    }

    #[test]
    fn output_content_string() {
        let body = json!({"output": [{"content": "plain"}]});
        assert_eq!(
            ResponseShape::OutputContent.extract(&body),
            Some("plain".to_string())
        );
    }

    #[test]
    fn chat_completion_message_in_batch() {
        let body = json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}]});
        assert_eq!(
            extract_text(&body, BATCH_SHAPES),
            Some((ResponseShape::ChoicesMessage, "ok".to_string()))
        );
    }

    #[test]
    fn stream_priority_prefers_delta_content() {
        let record = json!({
            "delta": {"content": "first"},
            "choices": [{"delta": {"content": "second"}}]
        });
        assert_eq!(
            extract_text(&record, STREAM_SHAPES).map(|(_, t)| t),
            Some("first".to_string())
        );
    }

    #[test]
    fn empty_text_falls_through_to_next_shape() {
        let record = json!({
            "delta": {"content": ""},
            "choices": [{"delta": {"content": "next"}}]
        });
        assert_eq!(
            extract_text(&record, STREAM_SHAPES),
            Some((ResponseShape::ChoicesDelta, "next".to_string()))
        );
    }

    #[test]
    fn responses_api_delta_string() {
        let record = json!({"type": "response.output_text.delta", "delta": "tok"});
        assert_eq!(
            extract_text(&record, STREAM_SHAPES),
            Some((ResponseShape::DeltaText, "tok".to_string()))
        );
    }

    #[test]
    fn completion_text_choice() {
        let record = json!({"choices": [{"text": "legacy"}]});
        assert_eq!(
            extract_text(&record, STREAM_SHAPES),
            Some((ResponseShape::ChoicesText, "legacy".to_string()))
        );
    }

    #[test]
    fn unrecognized_shape_yields_nothing() {
        assert_eq!(extract_text(&json!({"id": "x", "choices": []}), BATCH_SHAPES), None);
        assert_eq!(extract_text(&json!({"output": []}), BATCH_SHAPES), None);
        assert_eq!(extract_text(&json!({"delta": {"role": "assistant"}}), STREAM_SHAPES), None);
        assert_eq!(extract_text(&json!("bare string"), STREAM_SHAPES), None);
    }

    #[test]
    fn non_string_fields_are_ignored() {
        assert_eq!(ResponseShape::OutputText.extract(&json!({"output_text": 5})), None);
        assert_eq!(ResponseShape::DeltaText.extract(&json!({"delta": {"x": 1}})), None);
    }
}
