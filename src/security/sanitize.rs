//! Recursive input scrubbing applied to every JSON body and query value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Depth past which nested values are dropped rather than walked.
pub const MAX_DEPTH: usize = 32;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").expect("valid regex"));
static DANGEROUS_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(script|iframe|object|embed|applet|style|link|meta|base|form)\b[^>]*>")
        .expect("valid regex")
});
static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("valid regex")
});
static DANGEROUS_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(javascript|vbscript)\s*:|data\s*:\s*text/html").expect("valid regex"));

/// Scrub a single string value.
pub fn sanitize_str(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    let cleaned = SCRIPT_BLOCK.replace_all(&cleaned, "");
    let cleaned = DANGEROUS_TAG.replace_all(&cleaned, "");
    let cleaned = EVENT_HANDLER.replace_all(&cleaned, "");
    let cleaned = DANGEROUS_SCHEME.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

/// Scrub every string in `value` in place. Returns the number of strings changed.
/// Keys listed in `skip_fields` keep their values untouched.
pub fn sanitize_value(value: &mut Value, skip_fields: &[String]) -> usize {
    sanitize_at(value, skip_fields, 0)
}

fn sanitize_at(value: &mut Value, skip_fields: &[String], depth: usize) -> usize {
    if depth > MAX_DEPTH {
        *value = Value::Null;
        return 1;
    }
    match value {
        Value::String(s) => {
            let cleaned = sanitize_str(s);
            if cleaned != *s {
                *s = cleaned;
                1
            } else {
                0
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .map(|item| sanitize_at(item, skip_fields, depth + 1))
            .sum(),
        Value::Object(map) => map
            .iter_mut()
            .filter(|(key, _)| !skip_fields.iter().any(|f| f == *key))
            .map(|(_, item)| sanitize_at(item, skip_fields, depth + 1))
            .sum(),
        _ => 0,
    }
}
