//! Best-effort structure extraction from free-form model output.
//!
//! Vision prompts usually ask the model to finish with a JSON object, but
//! models wrap it in prose, markdown fences or `<think>` blocks. The scanner
//! here walks brace depth rather than matching a regex, so nested objects and
//! braces inside JSON strings are handled.

use serde_json::Value;

/// Extract the first balanced `{...}` object in `text` that parses as JSON.
///
/// Scanning is brace-depth based and string-aware once inside an object.
/// A balanced candidate that fails to parse is skipped and scanning resumes
/// after it. Returns `None` when no balanced, valid object exists.
pub fn extract_json_block(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        // Braces are ASCII, so both ends are char boundaries.
                        if let Ok(value @ Value::Object(_)) =
                            serde_json::from_str::<Value>(&text[s..=i])
                        {
                            return Some(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip `<think>...</think>` blocks emitted by reasoning models.
///
/// Handles both complete and incomplete think blocks:
/// - `<think>reasoning</think>content` -> `content`
/// - `<think>reasoning without closing` -> `` (strips to end)
pub fn strip_think_tags(text: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find("<think>") {
        if let Some(end) = result[start..].find("</think>") {
            result = format!("{}{}", &result[..start], &result[start + end + 8..]);
        } else {
            // No closing tag: strip from <think> to end
            result = result[..start].to_string();
            break;
        }
    }
    result
}

/// Structured block for a model reply: think blocks removed, then scanned.
pub(crate) fn structured_block(content: &str) -> Option<Value> {
    extract_json_block(&strip_think_tags(content))
}
