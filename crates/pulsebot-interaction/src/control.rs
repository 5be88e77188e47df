//! Control directives embedded in generated text.
//!
//! A model may answer with a reserved token instead of content:
//! `NO_RESPONSE` (stay silent) or `MUTE_THREAD` (stay silent and never
//! engage with this thread again). Output may also be a JSON object whose
//! `content` field carries the text.

use pulsebot_types::{ControlResponse, ControlType};
use serde_json::Value;

pub const EMPTY_OUTPUT: &str = "Empty output";
pub const MISSING_CONTENT: &str = "JSON response missing content field";

/// Text to scan (and publish) from raw model output.
///
/// `Err` carries the reason the output cannot be used at all.
pub fn effective_text(text: &str) -> Result<String, &'static str> {
    if text.trim().is_empty() {
        return Err(EMPTY_OUTPUT);
    }
    let content = match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => match map.get("content") {
            None | Some(Value::Null) => return Err(MISSING_CONTENT),
            Some(Value::String(content)) => content.clone(),
            Some(other) => other.to_string(),
        },
        // Plain text, malformed JSON and non-object JSON are scanned as-is.
        _ => text.to_string(),
    };
    if content.trim().is_empty() {
        return Err(EMPTY_OUTPUT);
    }
    Ok(content)
}

/// Decide whether generated text should be posted.
pub fn detect_control_response(text: &str, keywords: &[String]) -> ControlResponse {
    let content = match effective_text(text) {
        Ok(content) => content,
        Err(reason) => return ControlResponse::hold(reason),
    };

    match content.trim() {
        "NO_RESPONSE" => ControlResponse::directive(ControlType::NoResponse),
        "MUTE_THREAD" => ControlResponse::directive(ControlType::MuteThread),
        trimmed => match find_keyword(trimmed, keywords) {
            Some(keyword) => ControlResponse {
                should_post: false,
                control_type: Some(ControlType::NoResponse),
                reason: Some(format!("Contains no-response keyword: {keyword}")),
            },
            None => ControlResponse::post(),
        },
    }
}

/// First configured keyword found in `text`, case-insensitively.
pub fn find_keyword<'a>(text: &str, keywords: &'a [String]) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(String::as_str)
        .filter(|keyword| !keyword.is_empty())
        .find(|keyword| haystack.contains(&keyword.to_lowercase()))
}
