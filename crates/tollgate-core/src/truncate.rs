//! Size ceiling for tool results.
//!
//! The reducer never removes keys from structured results. Strings are cut
//! at a char boundary and carry a trailing marker; content arrays have each
//! text cut independently; any other shape is wrapped with a preview.

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Non-fatal notice that a result was reduced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TruncationWarning {
    pub strategy: &'static str,
    pub original_bytes: usize,
    pub truncated_bytes: usize,
}

fn marker(original: usize) -> String {
    format!("\n...[truncated: {original} bytes total]")
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(usize::MAX)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Longest prefix of `text` plus marker whose JSON string encoding fits
/// in `budget` bytes.
fn fit_text(text: &str, budget: usize, original: usize) -> String {
    let tail = marker(original);
    let mut keep = budget.saturating_sub(tail.len() + 2).min(text.len());
    loop {
        let cut = floor_char_boundary(text, keep);
        let candidate = format!("{}{}", &text[..cut], tail);
        let encoded = serialized_len(&Value::String(candidate.clone()));
        if encoded <= budget || cut == 0 {
            return candidate;
        }
        keep = cut.saturating_sub((encoded - budget).max(1));
    }
}

/// Reduce `value` to at most `max_bytes` serialized bytes.
pub fn truncate_result(value: Value, max_bytes: usize) -> (Value, Option<TruncationWarning>) {
    let original = serialized_len(&value);
    if original <= max_bytes {
        return (value, None);
    }

    let (reduced, strategy) = match value {
        Value::String(text) => (Value::String(fit_text(&text, max_bytes, original)), "string"),
        Value::Object(obj) if is_content_envelope(&obj) => {
            (reduce_content(obj, max_bytes, original), "content")
        }
        other => (wrap(&other, max_bytes, original), "wrapped"),
    };

    let warning = TruncationWarning {
        strategy,
        original_bytes: original,
        truncated_bytes: serialized_len(&reduced),
    };
    (reduced, Some(warning))
}

fn is_content_envelope(obj: &Map<String, Value>) -> bool {
    matches!(obj.get("content"), Some(Value::Array(_)))
}

fn reduce_content(mut obj: Map<String, Value>, max_bytes: usize, original: usize) -> Value {
    let per_item = max_bytes / 2;
    cut_texts(&mut obj, per_item, original);
    obj.insert("_truncated".into(), Value::Bool(true));

    // Several large items can still overflow at half the budget each.
    let texts = text_count(&obj).max(1);
    if serialized_len(&Value::Object(obj.clone())) > max_bytes && texts > 1 {
        cut_texts(&mut obj, per_item / texts, original);
    }
    Value::Object(obj)
}

fn cut_texts(obj: &mut Map<String, Value>, budget: usize, original: usize) {
    if let Some(Value::Array(items)) = obj.get_mut("content") {
        for item in items.iter_mut() {
            if let Some(Value::String(text)) = item.get_mut("text") {
                if text.len() > budget {
                    *text = fit_text(text, budget, original);
                }
            }
        }
    }
}

fn text_count(obj: &Map<String, Value>) -> usize {
    match obj.get("content") {
        Some(Value::Array(items)) => items.iter().filter(|i| i.get("text").is_some()).count(),
        _ => 0,
    }
}

fn wrap(value: &Value, max_bytes: usize, original: usize) -> Value {
    let rendered = serde_json::to_string(value).unwrap_or_default();
    json!({
        "_truncated": true,
        "warning": format!(
            "result of {original} bytes exceeded the {max_bytes} byte limit; showing a preview"
        ),
        "preview": fit_text(&rendered, max_bytes / 2, original),
    })
}
