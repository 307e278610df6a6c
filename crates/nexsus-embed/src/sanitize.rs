//! Mandatory text sanitization before any provider call.

use tracing::info;

/// Placeholder submitted for empty or whitespace-only texts.
pub const EMPTY_PLACEHOLDER: &str = "[empty]";

/// Sanitize one text: remove null bytes, strip control characters except
/// `\t` and `\n`, replace blank texts with [`EMPTY_PLACEHOLDER`], truncate
/// to `max_chars`. Mutations are logged at info.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|c| *c != '\0' && (!c.is_control() || *c == '\t' || *c == '\n'))
        .collect();
    let stripped = cleaned.len() != text.len();

    if cleaned.trim().is_empty() {
        info!(original_len = text.len(), "blank text replaced with placeholder");
        return EMPTY_PLACEHOLDER.to_string();
    }

    let mut truncated = false;
    if cleaned.chars().count() > max_chars {
        cleaned = cleaned.chars().take(max_chars).collect();
        truncated = true;
    }

    if stripped || truncated {
        info!(
            original_len = text.len(),
            sanitized_len = cleaned.len(),
            stripped,
            truncated,
            "text sanitized before embedding"
        );
    }
    cleaned
}

/// Sanitize a whole batch, preserving order and arity.
pub fn sanitize_all(texts: &[String], max_chars: usize) -> Vec<String> {
    texts.iter().map(|t| sanitize_text(t, max_chars)).collect()
}
