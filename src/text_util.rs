//! Character-aware string helpers.
//!
//! The retrieval and sanitizing passes measure lengths in characters, not
//! bytes, so every slice taken here lands on a `char` boundary.

/// Maximum number of characters shown for a chunk preview.
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// Number of characters in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the `n`th character, or `text.len()` past the end.
pub fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map_or(text.len(), |(byte_idx, _)| byte_idx)
}

/// The first `n` characters of `text`.
pub fn take_chars(text: &str, n: usize) -> &str {
    &text[..byte_offset(text, n)]
}

/// The last `n` characters of `text`.
pub fn last_chars(text: &str, n: usize) -> &str {
    let total = char_len(text);
    &text[byte_offset(text, total.saturating_sub(n))..]
}

/// Find `needle` in `haystack` at or after byte offset `from`, comparing
/// ASCII letters case-insensitively. Returns the byte offset of the match.
///
/// Needles are expected to be ASCII; a match can then only start on a
/// `char` boundary.
pub fn find_ignore_ascii_case(
    haystack: &str,
    needle: &str,
    from: usize,
) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if pat.is_empty() || from > hay.len() || hay.len() - from < pat.len() {
        return None;
    }

    (from..=hay.len() - pat.len())
        .find(|&start| hay[start..start + pat.len()].eq_ignore_ascii_case(pat))
}

/// Whether `text` starts with `prefix`, ignoring ASCII case.
pub fn starts_with_ignore_ascii_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()]
            .eq_ignore_ascii_case(prefix.as_bytes())
}

/// A single-line preview of `text` for logs and terminal output.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    if char_len(&flat) <= max_chars {
        return flat;
    }
    format!("{}...", take_chars(&flat, max_chars))
}
