//! Character-bounded text helpers.

/// Truncate `text` to at most `max_chars` characters, appending a notice with
/// the number of characters removed. Never splits a UTF-8 code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    format!("{}\n[truncated {} chars]", &text[..cut], total - max_chars)
}
