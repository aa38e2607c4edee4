//! Threat signatures matched against raw request text.
//!
//! The table is fixed at compile time. Patterns are deliberately narrower
//! than "any quote or dash" so ordinary therapy notes and messages do not
//! trip them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreatCategory::SqlInjection => "sql_injection",
            ThreatCategory::Xss => "xss",
            ThreatCategory::PathTraversal => "path_traversal",
            ThreatCategory::CommandInjection => "command_injection",
        };
        f.write_str(name)
    }
}

pub struct ThreatPattern {
    pub name: &'static str,
    pub category: ThreatCategory,
    regex: Regex,
}

/// A single signature hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatMatch {
    pub pattern: &'static str,
    pub category: ThreatCategory,
    /// Where the hit was found: `path`, `query.<name>`, `body.<a>.<b>[i]`.
    pub location: String,
}

macro_rules! threat_pattern {
    ($name:expr, $category:ident, $re:expr) => {
        ThreatPattern {
            name: $name,
            category: ThreatCategory::$category,
            regex: Regex::new($re).expect("threat pattern must compile"),
        }
    };
}

static PATTERNS: Lazy<Vec<ThreatPattern>> = Lazy::new(|| {
    vec![
        // ── SQL injection ──────────────────────────────────────────────────
        threat_pattern!("sql_union_select", SqlInjection, r"(?i)\bunion\b(\s|/\*.*?\*/|\+)+(all(\s|\+)+)?select\b"),
        threat_pattern!("sql_tautology", SqlInjection, r#"(?i)['"`]\s*(or|and)\s+['"`]?[\w-]+['"`]?\s*=\s*['"`]?[\w-]+"#),
        threat_pattern!("sql_stacked_query", SqlInjection, r"(?i);\s*(drop|delete|truncate|alter|insert|update|create|exec)\s"),
        threat_pattern!("sql_comment_terminator", SqlInjection, r#"(?i)['"`]\s*(--|#|/\*)"#),
        threat_pattern!("sql_ddl", SqlInjection, r"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\b"),
        threat_pattern!("sql_time_based", SqlInjection, r"(?i)\b(sleep|pg_sleep|benchmark)\s*\(\s*\d+|\bwaitfor\s+delay\b"),
        threat_pattern!("sql_stored_procedure", SqlInjection, r"(?i)\bexec(\s|\+)+(xp|sp)_\w+"),
        threat_pattern!("sql_encoded_quote", SqlInjection, r"(?i)%27(\s|%20|\+)*(or|and|union)\b"),
        // ── Cross-site scripting ───────────────────────────────────────────
        threat_pattern!("xss_script_tag", Xss, r"(?i)<\s*/?\s*script\b|%3c\s*script"),
        threat_pattern!("xss_js_scheme", Xss, r"(?i)\b(javascript|vbscript)\s*:"),
        threat_pattern!("xss_event_handler", Xss, r#"(?i)<[^>]*\bon[a-z]+\s*="#),
        threat_pattern!("xss_embedded_object", Xss, r"(?i)<\s*(iframe|object|embed|applet|base|meta)\b"),
        threat_pattern!("xss_dom_sink", Xss, r"(?i)\bdocument\s*\.\s*(cookie|write|location)\b|\bwindow\s*\.\s*location\b"),
        threat_pattern!("xss_eval", Xss, r"(?i)\b(eval|settimeout|setinterval)\s*\(\s*['\x22`]"),
        threat_pattern!("xss_data_html", Xss, r"(?i)data\s*:\s*text/html"),
        // ── Path traversal ─────────────────────────────────────────────────
        threat_pattern!("traversal_dot_dot", PathTraversal, r"\.\.[/\\]"),
        threat_pattern!("traversal_encoded", PathTraversal, r"(?i)(%2e%2e|\.%2e|%2e\.)(%2f|%5c|/|\\)|%252e%252e"),
        threat_pattern!("traversal_sensitive_file", PathTraversal, r"(?i)/etc/(passwd|shadow|hosts)\b|\bc:\\windows\\|\bboot\.ini\b"),
        threat_pattern!("traversal_null_byte", PathTraversal, r"%00|\x00"),
        // ── Command injection ──────────────────────────────────────────────
        threat_pattern!("cmd_chained_shell", CommandInjection, r"(?i)(;|\|\|?|&&)\s*(cat|ls|rm|wget|curl|nc|ncat|bash|sh|zsh|powershell|chmod|whoami)\b"),
        threat_pattern!("cmd_substitution", CommandInjection, r"\$\([^)]*\)|`[^`]+`"),
    ]
});

/// All compiled signatures, in evaluation order.
pub fn all_patterns() -> &'static [ThreatPattern] {
    &PATTERNS
}

/// Scan a single piece of text. Every pattern reports at most once.
pub fn scan_text(text: &str, location: &str) -> Vec<ThreatMatch> {
    if text.is_empty() {
        return Vec::new();
    }
    all_patterns()
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| ThreatMatch {
            pattern: p.name,
            category: p.category,
            location: location.to_string(),
        })
        .collect()
}

/// Recursively scan every string value (and object key) in a JSON document.
/// Fields named in `skip_fields` are not scanned, nor is anything below them.
pub fn scan_json(value: &Value, location: &str, skip_fields: &[String]) -> Vec<ThreatMatch> {
    let mut matches = Vec::new();
    walk(value, location, skip_fields, &mut matches);
    matches
}

fn walk(value: &Value, location: &str, skip_fields: &[String], out: &mut Vec<ThreatMatch>) {
    match value {
        Value::String(s) => out.extend(scan_text(s, location)),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &format!("{}[{}]", location, i), skip_fields, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                if skip_fields.iter().any(|f| f == key) {
                    continue;
                }
                let child = format!("{}.{}", location, key);
                out.extend(scan_text(key, &child));
                walk(item, &child, skip_fields, out);
            }
        }
        _ => {}
    }
}
