//! Structured-output parsing shared by every JSON-producing LLM call.
//! Handles common LLM quirks: markdown fences, trailing text, partial JSON.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;

/// Strip markdown fences and narrow to the outermost `{...}` span.
pub fn extract_json_object(raw: &str) -> &str {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    }
}

/// Strict serde parse of the JSON object embedded in `raw`.
pub fn parse_strict<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let json_str = extract_json_object(raw);
    serde_json::from_str::<T>(json_str)
        .map_err(|e| anyhow!("malformed structured output: {}", e))
}

/// Extract a JSON string field value by scanning for `"field":"value"`.
pub fn extract_json_string(json: &str, field: &str) -> Option<String> {
    let pattern = format!("\"{}\"", field);
    let pos = json.find(&pattern)?;
    let after_key = &json[pos + pattern.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?;
    let trimmed = after_colon.trim_start();

    let content = trimmed.strip_prefix('"')?;

    // Find the closing quote, handling escaped quotes
    let mut escaped = false;
    for (i, ch) in content.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => return Some(content[..i].to_string()),
            _ => {}
        }
    }
    None
}

/// Extract a numeric field by scanning for `"field": 0.42` (quoted numbers accepted).
pub fn extract_json_number(json: &str, field: &str) -> Option<f64> {
    let pattern = format!("\"{}\"", field);
    let pos = json.find(&pattern)?;
    let after_key = &json[pos + pattern.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?.trim_start();
    let unquoted = after_colon.trim_start_matches('"');

    let end = unquoted
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == 'e' || c == 'E'))
        .unwrap_or(unquoted.len());
    unquoted[..end].parse::<f64>().ok()
}
