//! Assembling ranked chunks into one bounded context string.
//!
//! Chunks are joined in ranking order. Text shared with the end of the
//! previous chunk (the chunker's overlap) is stripped so the model never
//! reads a passage twice. When the next chunk does not fit, it is cut at a
//! sentence boundary if one lies far enough in, and assembly stops.

use crate::{
    similarity::ScoredChunk,
    text_util::{char_len, last_chars, take_chars},
};

/// Marker appended to a chunk that was cut short.
pub const ELLIPSIS: char = '…';

/// Default context budget in characters.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 1500;

/// Returned when there is nothing to assemble.
pub const NO_CONTEXT_PLACEHOLDER: &str = "(No source text available.)";

const SENTENCE_ENDS: &[&str] = &[
    ". ", "! ", "? ", ".\n", "!\n", "?\n", ".\r\n", "!\r\n", "?\r\n",
];

/// Tunables for [`assemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Upper bound on the output length in characters.
    pub max_chars: usize,
    /// Placed between consecutive chunks.
    pub separator: String,
    /// How many trailing characters of the previous chunk are compared
    /// against the start of the next one.
    pub overlap_window: usize,
    /// Shorter shared runs are not treated as overlap.
    pub min_overlap: usize,
    /// A truncated chunk must keep more than this fraction of the space
    /// that was left, otherwise it is dropped.
    pub min_fill_ratio: f32,
    /// No partial chunk is attempted with this much space or less.
    pub min_partial_chars: usize,
    pub placeholder: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CONTEXT_CHARS,
            separator: "\n\n".to_string(),
            overlap_window: 100,
            min_overlap: 20,
            min_fill_ratio: 0.75,
            min_partial_chars: 100,
            placeholder: NO_CONTEXT_PLACEHOLDER.to_string(),
        }
    }
}

impl ContextConfig {
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

/// Assemble the text of ranked chunks into a context string.
pub fn assemble_chunks(
    ranked: &[ScoredChunk],
    config: &ContextConfig,
) -> String {
    assemble(ranked.iter().map(|s| s.chunk.text()), config)
}

/// Join `texts` in order into a context of at most `config.max_chars`
/// characters.
///
/// Empty input yields `config.placeholder`. Blank texts are skipped.
///
/// # Examples
///
/// ```
/// use pocketrag::context::{ContextConfig, assemble};
///
/// let config = ContextConfig::default();
/// let previous = "The river floods every spring after the snow melts.";
/// let next = "after the snow melts. Farmers plant in early summer.";
///
/// assert_eq!(
///     assemble([previous, next], &config),
///     "The river floods every spring after the snow melts.\n\n\
///      Farmers plant in early summer."
/// );
/// assert_eq!(assemble(Vec::<&str>::new(), &config), config.placeholder);
/// ```
pub fn assemble<'a, I>(texts: I, config: &ContextConfig) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut texts = texts.into_iter().peekable();
    if texts.peek().is_none() {
        return config.placeholder.clone();
    }

    let separator_chars = char_len(&config.separator);
    let mut out = String::new();
    let mut out_chars = 0;
    let mut previous_end = String::new();

    for text in texts {
        let mut part = text.trim();
        if part.is_empty() {
            continue;
        }

        if !out.is_empty() && !previous_end.is_empty() {
            part = remove_overlap(&previous_end, part, config);
            if part.is_empty() {
                continue;
            }
        }

        let need_separator = !out.is_empty();
        let part_chars = char_len(part);
        let separator_cost = if need_separator { separator_chars } else { 0 };
        let added = part_chars + separator_cost;

        if out_chars + added > config.max_chars {
            let space_left = config
                .max_chars
                .saturating_sub(out_chars)
                .saturating_sub(separator_cost);

            if space_left > config.min_partial_chars
                && let Some(piece) = partial(part, space_left, config)
            {
                if need_separator {
                    out.push_str(&config.separator);
                }
                out.push_str(piece);
                out.push(ELLIPSIS);
                tracing::debug!(
                    kept = char_len(piece),
                    of = part_chars,
                    "context budget reached, truncated last chunk"
                );
            } else {
                tracing::debug!(
                    chars = part_chars,
                    space_left,
                    "context budget reached, dropped chunk"
                );
            }
            break;
        }

        if need_separator {
            out.push_str(&config.separator);
        }
        out.push_str(part);
        out_chars += added;
        previous_end = last_chars(part, config.overlap_window).to_string();
    }

    out
}

/// Strip the longest prefix of `next` that repeats the end of `previous`.
///
/// Candidate lengths run from `overlap_window` down to `min_overlap`.
fn remove_overlap<'a>(
    previous: &str,
    next: &'a str,
    config: &ContextConfig,
) -> &'a str {
    let check = config
        .overlap_window
        .min(char_len(previous))
        .min(char_len(next));

    for len in (config.min_overlap.max(1)..=check).rev() {
        let suffix = last_chars(previous, len);
        if let Some(rest) = next.strip_prefix(suffix) {
            return rest.trim();
        }
    }

    next
}

/// The longest sentence-aligned prefix of `part` that fits in `space_left`
/// characters together with the ellipsis, if it keeps enough of the space.
fn partial<'a>(
    part: &'a str,
    space_left: usize,
    config: &ContextConfig,
) -> Option<&'a str> {
    let window = take_chars(part, space_left.saturating_sub(1));
    let end = SENTENCE_ENDS
        .iter()
        .filter_map(|pat| window.rfind(pat))
        .max()?;

    let end_chars = char_len(&window[..end]);
    if (end_chars as f32) <= space_left as f32 * config.min_fill_ratio {
        return None;
    }

    // Keep the punctuation mark itself.
    let piece = window[..end + 1].trim();
    (!piece.is_empty()).then_some(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk_text;

    fn sentence(i: usize) -> String {
        format!("Sentence number {i} talks about topic {i}. ")
    }

    fn paragraph(sentences: std::ops::Range<usize>) -> String {
        sentences.map(sentence).collect::<String>().trim().to_string()
    }

    #[test]
    fn empty_input_gives_placeholder() {
        let config = ContextConfig::default();
        assert_eq!(
            assemble(std::iter::empty(), &config),
            NO_CONTEXT_PLACEHOLDER
        );
        assert_eq!(assemble_chunks(&[], &config), NO_CONTEXT_PLACEHOLDER);
    }

    #[test]
    fn joins_with_separator_in_order() {
        let config = ContextConfig::default();
        let out = assemble(["  first chunk  ", "", "second chunk"], &config);
        assert_eq!(out, "first chunk\n\nsecond chunk");
    }

    #[test]
    fn short_shared_text_is_kept() {
        let config = ContextConfig::default();
        // Shares only "the end." (8 chars), below the 20 character minimum.
        let out = assemble(["this is the end.", "the end. And more."], &config);
        assert_eq!(out, "this is the end.\n\nthe end. And more.");
    }

    #[test]
    fn fully_duplicated_chunk_is_skipped() {
        let config = ContextConfig::default();
        let text = "A duplicated chunk that is long enough to count.";
        let out = assemble([text, text, "tail"], &config);
        assert_eq!(out, format!("{text}\n\ntail"));
    }

    #[test]
    fn chunker_overlap_is_never_duplicated() {
        let text: String = (0..200)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 400, 80);
        assert!(chunks.len() > 2);

        let config = ContextConfig::default().with_max_chars(100_000);
        let out = assemble(chunks.iter().map(String::as_str), &config);
        assert_eq!(out.replace("\n\n", " "), text);
    }

    #[test]
    fn output_never_exceeds_budget() {
        let chunks: Vec<String> =
            (0..12).map(|i| paragraph(i * 10..i * 10 + 8)).collect();
        for max_chars in [0, 50, 150, 333, 700, 1000, 1500, 5000] {
            let config = ContextConfig::default().with_max_chars(max_chars);
            let out = assemble(chunks.iter().map(String::as_str), &config);
            assert!(
                char_len(&out) <= max_chars,
                "{} chars with a budget of {max_chars}",
                char_len(&out)
            );
        }
    }

    #[test]
    fn partial_chunk_cut_at_sentence_boundary() {
        let first = "x".repeat(100);
        let second = paragraph(0..20);
        let config = ContextConfig::default().with_max_chars(400);

        let out = assemble([first.as_str(), second.as_str()], &config);

        let expected_prefix = format!("{first}\n\nSentence number 0");
        assert!(out.starts_with(&expected_prefix));
        assert!(out.ends_with(".…"));
        assert!(char_len(&out) <= 400);
        // More than 75% of the 298 characters left are used.
        assert!(char_len(&out) - 102 > 223);
    }

    #[test]
    fn partial_chunk_without_boundary_is_dropped() {
        let first = "x".repeat(100);
        let second = "y ".repeat(300);
        let third = "short";
        let config = ContextConfig::default().with_max_chars(400);

        let out = assemble([first.as_str(), second.as_str(), third], &config);
        assert_eq!(out, first);
    }

    #[test]
    fn assembly_stops_after_overflow() {
        let first = "a".repeat(1400);
        let second = "b".repeat(200);
        let config = ContextConfig::default();

        let out = assemble([first.as_str(), second.as_str(), "tiny"], &config);
        assert_eq!(out, first);
    }

    #[test]
    fn early_sentence_boundary_is_not_enough() {
        let first = "a".repeat(1350);
        let second = format!("Short one. {}", "z".repeat(300));
        let config = ContextConfig::default();

        let out = assemble([first.as_str(), second.as_str()], &config);
        assert_eq!(out, first);
    }

    #[test]
    fn oversized_first_chunk_is_cut() {
        let only = paragraph(0..100);
        let config = ContextConfig::default().with_max_chars(500);

        let out = assemble([only.as_str()], &config);
        assert!(out.starts_with("Sentence number 0"));
        assert!(out.ends_with(".…"));
        assert!(char_len(&out) <= 500);
    }
}
