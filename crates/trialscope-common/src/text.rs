//! Free-text sanitising shared by every source adapter.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref WS_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Strip markup tags, collapse runs of whitespace and trim. Tags are
/// removed outright so inline markup (`HbA<sub>1c</sub>`) stays one word.
pub fn sanitize(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, "");
    WS_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Sanitise `text`, substituting `sentinel` when nothing is left.
pub fn sanitize_or(text: &str, sentinel: &str) -> String {
    let clean = sanitize(text);
    if clean.is_empty() { sentinel.to_string() } else { clean }
}

/// Truncate to at most `max_chars` characters, on a char boundary.
/// Returns the input unchanged when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
