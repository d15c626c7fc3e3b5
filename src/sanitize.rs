//! Cleanup of raw text from small local language models.
//!
//! Small models tend to echo the prompt before or after their answer and
//! to get stuck in loops. [`sanitize`] runs a fixed sequence of passes:
//! leading echo strip, answer label strip, trailing echo cut, repetition
//! cut, then a length cap. Echo stripping comes first because an echoed
//! prompt can itself look like repeated boilerplate.

use std::collections::{HashMap, HashSet};

use crate::text_util::{
    byte_offset, char_len, find_ignore_ascii_case, starts_with_ignore_ascii_case,
    take_chars,
};

/// Prompt fragments stripped when they appear near the start of an answer.
pub const LEADING_ECHO_MARKERS: &[&str] = &[
    "### Response:",
    "### Instruction:",
    "Answer the question using ONLY",
    "Context from documents:",
    "Based on the context above",
    "Answer based ONLY on these passages",
    "Question:",
    "Context:",
    "Answer briefly and directly:",
];

/// Markers showing the model started repeating the prompt after answering.
pub const TRAILING_ECHO_MARKERS: &[&str] = &[
    "### Instruction:",
    "### Context:",
    "### Question:",
    "### Response:",
    "Q:",
    "Question:",
    "Context:",
    "Answer briefly",
    "Answer based ONLY",
    "Based on the context",
    "Answer the question using",
];

const ANSWER_LABELS: &[&str] = &["Answer:", "A:"];

/// Tunables for [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizerConfig {
    /// Longer answers are cut down to this many characters.
    pub max_answer_chars: usize,
    /// A sentence boundary must lie past this character to be used for
    /// the length cut.
    pub min_sentence_cut: usize,
    /// Leading echo markers are only searched for in this many characters.
    pub leading_window: usize,
    /// Trailing echo markers are only searched for after this many
    /// characters.
    pub trailing_skip: usize,
    /// Shorter text is never checked for repetition.
    pub min_repetition_chars: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_answer_chars: 800,
            min_sentence_cut: 200,
            leading_window: 100,
            trailing_skip: 30,
            min_repetition_chars: 30,
        }
    }
}

/// Clean raw generated text into a final answer.
///
/// # Examples
///
/// ```
/// use pocketrag::sanitize::{SanitizerConfig, sanitize};
///
/// let config = SanitizerConfig::default();
/// assert_eq!(
///     sanitize("### Response: Paris is the capital.", &config),
///     "Paris is the capital."
/// );
/// assert_eq!(sanitize("Answer: 42", &config), "42");
/// ```
pub fn sanitize(raw: &str, config: &SanitizerConfig) -> String {
    let mut cleaned = raw.trim();

    cleaned = strip_leading_echo(cleaned, config.leading_window);
    cleaned = strip_answer_label(cleaned);
    cleaned = cut_trailing_echo(cleaned, config.trailing_skip);

    let cleaned = if char_len(cleaned) >= config.min_repetition_chars {
        truncate_repetition(cleaned)
    } else {
        cleaned.to_string()
    };

    cap_length(cleaned, config).trim().to_string()
}

fn strip_leading_echo(mut text: &str, window: usize) -> &str {
    for marker in LEADING_ECHO_MARKERS {
        let area = take_chars(text, window);
        let Some(idx) = find_ignore_ascii_case(area, marker, 0) else {
            continue;
        };
        let rest = text[idx + marker.len()..].trim();
        if !rest.is_empty() {
            text = rest;
        }
    }
    text
}

fn strip_answer_label(mut text: &str) -> &str {
    for label in ANSWER_LABELS {
        if starts_with_ignore_ascii_case(text, label) {
            text = text[label.len()..].trim();
        }
    }
    text
}

fn cut_trailing_echo(mut text: &str, skip: usize) -> &str {
    for marker in TRAILING_ECHO_MARKERS {
        let start = byte_offset(text, skip);
        if let Some(idx) = find_ignore_ascii_case(text, marker, start) {
            tracing::debug!(marker, "cut prompt echo after answer");
            text = text[..idx].trim();
        }
    }
    text
}

/// Cut a repetition loop. The first detector that fires wins.
fn truncate_repetition(text: &str) -> String {
    if let Some(cut) = repeated_lines(text) {
        return cut;
    }
    if let Some(cut) = repeated_pattern(text) {
        return cut;
    }
    if let Some(cut) = repeated_word(text) {
        return cut;
    }
    text.to_string()
}

/// A line of at least 3 characters occurring 3 or more times: keep each
/// distinct line once, up to where that line recurs.
fn repeated_lines(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &line in &lines {
        *counts.entry(line).or_default() += 1;
    }

    let repeated = *lines
        .iter()
        .find(|l| counts[*l] >= 3 && char_len(l) >= 3)?;

    tracing::warn!(
        count = counts[repeated],
        line = take_chars(repeated, 30),
        "detected repeated line in answer"
    );

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for &line in &lines {
        if line == repeated && seen.contains(line) {
            break;
        }
        if seen.insert(line) {
            kept.push(line);
        }
    }

    if kept.is_empty() {
        return Some(lines[0].to_string());
    }
    Some(kept.join("\n"))
}

/// A 3 to 20 character pattern repeated at least 3 times back to back:
/// cut before the first run.
fn repeated_pattern(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    for len in 3..=20 {
        let mut i = 0;
        while i + len * 3 < n {
            let pattern = &chars[i..i + len];
            if pattern.iter().all(|c| c.is_whitespace()) {
                i += 1;
                continue;
            }

            let mut count = 1;
            let mut j = i + len;
            while j + len <= n && &chars[j..j + len] == pattern {
                count += 1;
                j += len;
            }

            if count >= 3 {
                let pattern: String = pattern.iter().collect();
                tracing::warn!(
                    count,
                    pattern = pattern.as_str(),
                    "detected repeated pattern in answer"
                );
                let before = text[..byte_offset(text, i)].trim();
                return Some(if before.is_empty() {
                    pattern.trim().to_string()
                } else {
                    before.to_string()
                });
            }
            i += 1;
        }
    }

    None
}

/// A word of at least 2 characters repeated 5 or more times in a row: cut
/// before the run.
fn repeated_word(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    for i in 0..words.len().saturating_sub(4) {
        let word = words[i];
        if char_len(word) < 2 {
            continue;
        }
        let count = words[i..].iter().take_while(|w| **w == word).count();
        if count >= 5 {
            tracing::warn!(count, word, "detected repeated word in answer");
            return Some(if i == 0 {
                word.to_string()
            } else {
                words[..i].join(" ")
            });
        }
    }

    None
}

fn cap_length(text: String, config: &SanitizerConfig) -> String {
    if char_len(&text) <= config.max_answer_chars {
        return text;
    }

    let head = take_chars(&text, config.max_answer_chars);
    let sentence_end = head
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .last();

    match sentence_end {
        Some((byte_idx, _))
            if char_len(&head[..byte_idx]) > config.min_sentence_cut =>
        {
            head[..byte_idx + 1].to_string()
        }
        _ => format!("{head}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(raw: &str) -> String {
        sanitize(raw, &SanitizerConfig::default())
    }

    #[test]
    fn strips_leading_response_marker() {
        assert_eq!(
            clean("### Response: Paris is the capital."),
            "Paris is the capital."
        );
    }

    #[test]
    fn strips_echoed_prompt_before_answer() {
        let raw =
            "Context: some passage\nQuestion: where?\n### Response:\nIn the attic.";
        assert_eq!(clean(raw), "In the attic.");
    }

    #[test]
    fn keeps_marker_when_nothing_follows() {
        assert_eq!(clean("Question:"), "Question:");
    }

    #[test]
    fn leading_marker_beyond_window_is_kept() {
        let words: String =
            (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let raw = format!("{words} Question: kept");
        // Not stripped as a leading echo, but cut as a trailing one.
        assert_eq!(clean(&raw), words);
    }

    #[test]
    fn strips_answer_labels() {
        assert_eq!(clean("Answer: The sky is blue."), "The sky is blue.");
        assert_eq!(clean("a: yes"), "yes");
        assert_eq!(clean("ANSWER: A: both"), "both");
    }

    #[test]
    fn cuts_trailing_prompt_echo() {
        let answer = "Paris is the capital of France, and it has been the \
                      seat of government for most of the last thousand years.";
        let raw = format!("{answer} ### Question: what is the capital");
        assert_eq!(clean(&raw), answer);
    }

    #[test]
    fn trailing_marker_at_start_is_ignored() {
        // "Q:" inside the first 30 characters is not an echo.
        let raw = "Q: is a letter. The rest of this answer is fine.";
        assert_eq!(clean(raw), raw);
    }

    #[test]
    fn repeated_lines_keep_unique_prefix() {
        let raw = ["The answer is 42."; 4].join("\n");
        assert_eq!(clean(&raw), "The answer is 42.");

        let raw = "Intro line here.\nRepeat me\nRepeat me\nRepeat me\nRepeat me";
        assert_eq!(clean(raw), "Intro line here.\nRepeat me");
    }

    #[test]
    fn repeated_pattern_is_cut() {
        let raw = "Paris is the capital of France. \"The \"The \"The \"The";
        assert_eq!(clean(raw), "Paris is the capital of France.");
    }

    #[test]
    fn repeated_pattern_at_start_keeps_pattern() {
        let raw = "ha! ha! ha! ha! ha! ha! ha! ha! ha! ha!";
        assert_eq!(clean(raw), "ha!");
    }

    #[test]
    fn repeated_long_word_is_cut() {
        let word = "supercalifragilisticexpialidocious";
        let raw = format!("It was {}", [word; 6].join(" "));
        assert_eq!(clean(&raw), "It was");
    }

    #[test]
    fn short_text_skips_repetition_checks() {
        assert_eq!(clean("no no no no no"), "no no no no no");
    }

    #[test]
    fn long_answer_cut_at_sentence() {
        let mut raw = "This sentence is about some characters. ".repeat(10);
        for i in 0..15 {
            raw.push_str(&format!("Extra clause number {i} keeps going on. "));
        }
        let out = clean(&raw);
        assert!(char_len(&out) <= 800);
        assert!(out.ends_with('.'));
    }

    #[test]
    fn long_answer_without_sentence_is_hard_cut() {
        let raw: String = (1..=200)
            .map(|i| format!("token{i:04}"))
            .collect::<Vec<_>>()
            .join(" ");
        assert!(char_len(&raw) > 1990);

        let out = clean(&raw);
        assert_eq!(char_len(&out), 803);
        assert!(out.ends_with("..."));
        assert!(out.starts_with("token0001 token0002"));
    }

    #[test]
    fn clean_text_passes_through_and_is_idempotent() {
        let samples = [
            "Paris is the capital.",
            "The mitochondria is the powerhouse of the cell, producing ATP.",
            "Line one of the answer.\nLine two of the answer.",
            "",
        ];
        for sample in samples {
            let once = clean(sample);
            assert_eq!(once, sample);
            assert_eq!(clean(&once), once);
        }
    }

    #[test]
    fn sanitize_is_idempotent_on_echoed_input() {
        let answer = "The treaty was signed in 1648 in Westphalia, ending \
                      decades of war and reshaping borders across the continent.";
        let raw = format!("### Response: Answer: {answer} ### Question: when");
        let once = clean(&raw);
        assert_eq!(once, answer);
        assert_eq!(clean(&once), once);
    }

    #[test]
    fn multibyte_text_is_handled() {
        let raw: String = (0..300)
            .map(|i| format!("café{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let out = clean(&raw);
        assert_eq!(char_len(&out), 803);
        assert!(out.ends_with("..."));
    }
}
