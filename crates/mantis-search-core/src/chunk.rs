//! Whitespace-boundary splitter for extracted attachment text.
//!
//! A single `tsvector` cannot exceed 1 MiB, so long attachment text is
//! stored as several sequenced rows. Each piece is at most `max_bytes`
//! long and, where possible, ends just after the last whitespace
//! character that fits, so words are not cut in half.
//!
//! # Example
//!
//! ```rust
//! use mantis_search_core::chunk::split_at_whitespace;
//!
//! let pieces = split_at_whitespace("alpha beta gamma", 11);
//! assert_eq!(pieces, vec!["alpha beta ", "gamma"]);
//! ```

/// Split `text` into pieces of at most `max_bytes` bytes.
///
/// # Guarantees
///
/// - Concatenating the pieces yields `text` exactly.
/// - At least one piece is returned (even for empty text).
/// - Pieces never split a UTF-8 character.
pub fn split_at_whitespace(text: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(4);
    let mut pieces = Vec::new();
    let mut rest = text;

    while rest.len() > max_bytes {
        let cut = snap_to_char_boundary(rest, max_bytes);
        let split = match rest[..cut].rfind(['\n', '\t', '\r', ' ']) {
            Some(i) if i > 0 => i + 1,
            _ => cut,
        };
        pieces.push(&rest[..split]);
        rest = &rest[split..];
    }
    pieces.push(rest);
    pieces
}

/// Longest prefix of `text` that is at most `max_bytes` long.
pub fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    &text[..snap_to_char_boundary(text, max_bytes)]
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
