use regex::Regex;
use scraper::Html;
use serde_json::Value;
use std::sync::OnceLock;

use crate::core::sandbox::ExecutionResult;

/// Character cap on the text handed to the shaping model.
pub const MAX_TEXT_LENGTH: usize = 50_000;
pub const TRUNCATION_MARKER: &str = "\n[... truncated ...]";

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[a-zA-Z][^>]*>").expect("tag regex"))
}

fn noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<!--.*?-->")
            .expect("noise regex")
    })
}

/// Heuristic: does this string carry markup worth stripping?
pub fn looks_like_html(text: &str) -> bool {
    tag_regex().is_match(text)
}

/// Reduce HTML to its visible text: scripts, styles and comments removed,
/// entities decoded, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let cleaned = noise_regex().replace_all(html, " ");
    let document = Html::parse_document(&cleaned);
    let text = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a JSON value as readable lines: objects as `key: value`, lists
/// flattened recursively, HTML strings stripped to text.
pub fn value_to_text(value: &Value) -> String {
    let mut out = String::new();
    render(value, &mut out);
    out.trim_end().to_string()
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                match nested {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(key);
                        out.push_str(":\n");
                        render(nested, out);
                    }
                    _ => {
                        out.push_str(key);
                        out.push_str(": ");
                        render(nested, out);
                        out.push('\n');
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                render(item, out);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        Value::String(s) => {
            if looks_like_html(s) {
                out.push_str(&html_to_text(s));
            } else {
                out.push_str(s);
            }
        }
        Value::Null => out.push_str("null"),
        other => out.push_str(&other.to_string()),
    }
}

/// Build the shaping input from an execution: every record rendered as
/// text, capped at `max_length` with a visible truncation marker.
pub fn execution_to_text(execution: &ExecutionResult, max_length: usize) -> String {
    let mut combined = String::new();
    for (index, record) in execution.records.iter().enumerate() {
        if index > 0 {
            combined.push('\n');
        }
        combined.push_str(&value_to_text(&Value::Object(record.clone())));
        combined.push('\n');
    }

    if combined.chars().count() > max_length {
        let truncated: String = combined.chars().take(max_length).collect();
        return format!("{truncated}{TRUNCATION_MARKER}");
    }
    combined
}
