//! Recovers a JSON object from model output that may be wrapped in markdown
//! fences or surrounded by prose.

use crate::error::Result;
use serde::de::DeserializeOwned;

const FENCE: &str = "```";

/// Returns the slice of `text` most likely to hold a single JSON object.
///
/// Order of preference: the body of the first fenced code block, the span
/// from the first `{` to the last `}`, and finally `text` itself.
pub fn extract_json(text: &str) -> &str {
    if let Some(body) = fenced_body(text) {
        return body;
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find(FENCE)?;
    let after_fence = &text[open + FENCE.len()..];
    // Skip the info string ("json", "JSON", ...) up to the end of the line.
    let body_start = match after_fence.find('\n') {
        Some(newline) if !after_fence[..newline].contains(FENCE) => newline + 1,
        _ => 0,
    };
    let body = &after_fence[body_start..];
    let close = body.find(FENCE)?;
    Some(body[..close].trim())
}

/// Extracts and deserializes in one step.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(extract_json(text))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_prose_around_object() {
        assert_eq!(extract_json("blah {\"a\":1} blah"), "{\"a\":1}");
    }

    #[test]
    fn test_no_braces_returns_input() {
        let text = "the model refused politely";
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_fenced_block_content() {
        let text = "Sure!\n```json\n{\"topText\": \"x\"}\n```\nEnjoy.";
        assert_eq!(extract_json(text), "{\"topText\": \"x\"}");
    }

    #[test]
    fn test_bare_fence() {
        let text = "```\n{\"a\": [1, 2]}\n```";
        assert_eq!(extract_json(text), "{\"a\": [1, 2]}");
    }

    #[test]
    fn test_unterminated_fence_falls_back_to_braces() {
        let text = "```json\n{\"a\": 1}";
        assert_eq!(extract_json(text), "{\"a\": 1}");
    }

    #[test]
    fn test_nested_objects_keep_outer_span() {
        let text = "result: {\"a\": {\"b\": 2}} done";
        let parsed: Value = parse_json(text).unwrap();
        assert_eq!(parsed["a"]["b"], 2);
    }

    #[test]
    fn test_reversed_braces_do_not_panic() {
        let text = "} oops {";
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_parse_failure_is_an_error() {
        assert!(parse_json::<Value>("no json here").is_err());
    }
}
