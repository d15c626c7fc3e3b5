//! Lexical scoring of chunk text against a query's significant words.
//!
//! Embedding models handle paraphrase well but often miss proper nouns and
//! rare terms. Keyword scoring recovers those: each query term found in a
//! chunk earns one point, and a second point when it also appears as a
//! whole word.

use std::collections::BTreeSet;

use rayon::prelude::*;
use regex::Regex;

use crate::{
    chunk_db::StoredChunk,
    similarity::{ScoredChunk, sort_by_score},
    text_util::char_len,
};

/// Terms shorter than this many characters are ignored.
pub const MIN_TERM_CHARS: usize = 3;

/// Cap on the coverage bonus added to the match ratio.
pub const MAX_COVERAGE_BONUS: f32 = 0.3;

const TERM_SEPARATORS: &[char] =
    &[',', '.', '!', '?', ';', ':', '\'', '"', '(', ')', '[', ']', '{', '}'];

struct Term {
    text: String,
    chars: usize,
    whole_word: Option<Regex>,
}

/// The significant, de-duplicated words of a query.
pub struct QueryTerms {
    terms: Vec<Term>,
}

impl QueryTerms {
    /// Lower-case `query`, split it on whitespace and punctuation, and keep
    /// the distinct words of at least [`MIN_TERM_CHARS`] characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use pocketrag::keyword::QueryTerms;
    ///
    /// let terms = QueryTerms::parse("What is the Rust borrow-checker? Is it");
    /// assert_eq!(terms.words(), vec!["borrow-checker", "rust", "the", "what"]);
    /// assert!(QueryTerms::parse("is a ?").is_empty());
    /// ```
    pub fn parse(query: &str) -> Self {
        let lower = query.to_lowercase();
        let words: BTreeSet<&str> = lower
            .split(|c: char| c.is_whitespace() || TERM_SEPARATORS.contains(&c))
            .filter(|w| char_len(w) >= MIN_TERM_CHARS)
            .collect();

        let terms = words
            .into_iter()
            .map(|w| Term {
                text: w.to_string(),
                chars: char_len(w),
                whole_word: Regex::new(&format!(r"\b{}\b", regex::escape(w)))
                    .ok(),
            })
            .collect();

        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// The parsed terms in sorted order.
    pub fn words(&self) -> Vec<&str> {
        self.terms.iter().map(|t| t.text.as_str()).collect()
    }

    /// Match every term against `text`.
    pub fn match_text(&self, text: &str) -> KeywordMatch {
        let lower = text.to_lowercase();
        let mut result = KeywordMatch {
            points: 0,
            matched_chars: 0,
            term_count: self.terms.len(),
        };

        for term in &self.terms {
            if !lower.contains(&term.text) {
                continue;
            }
            result.points += 1;
            result.matched_chars += term.chars;
            if term.whole_word.as_ref().is_some_and(|re| re.is_match(&lower)) {
                result.points += 1;
            }
        }

        result
    }
}

impl std::fmt::Debug for QueryTerms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.words()).finish()
    }
}

/// How a chunk's text matched a set of query terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMatch {
    /// One point per term found as a substring, plus one per whole-word hit.
    pub points: usize,
    /// Total characters of the terms that were found.
    pub matched_chars: usize,
    pub term_count: usize,
}

impl KeywordMatch {
    /// Whether at least one term was found.
    pub fn is_match(&self) -> bool {
        self.points > 0
    }

    /// Points earned out of the two available per term, in `[0, 1]`.
    pub fn match_ratio(&self) -> f32 {
        if self.term_count == 0 {
            return 0.0;
        }
        (self.points as f32 / (2 * self.term_count) as f32).min(1.0)
    }

    /// Match ratio plus a capped coverage bonus for the share of the text
    /// taken up by matched terms, in `[0, 1]`.
    pub fn score(&self, text_chars: usize) -> f32 {
        let coverage = if text_chars == 0 {
            0.0
        } else {
            (self.matched_chars as f32 / text_chars as f32)
                .min(MAX_COVERAGE_BONUS)
        };
        (self.match_ratio() + coverage).min(1.0)
    }
}

/// Keyword score of `text` for `query`.
///
/// Returns `None` when the query has no significant terms, and `Some(0.0)`
/// when none of them occur in `text`.
///
/// # Examples
///
/// ```
/// use pocketrag::keyword::keyword_score;
///
/// assert_eq!(keyword_score("an", "an apple"), None);
/// assert_eq!(keyword_score("pear", "an apple"), Some(0.0));
/// assert!(keyword_score("apple", "an apple").unwrap() > 0.9);
/// ```
pub fn keyword_score(query: &str, text: &str) -> Option<f32> {
    let terms = QueryTerms::parse(query);
    if terms.is_empty() {
        return None;
    }
    let found = terms.match_text(text);
    Some(if found.is_match() {
        found.score(char_len(text))
    } else {
        0.0
    })
}

/// The `k` chunks with the best keyword score, highest first. Chunks that
/// match no term are left out.
pub fn top_k_by_keyword(
    query: &str,
    chunks: &[StoredChunk],
    k: usize,
) -> Vec<ScoredChunk> {
    let terms = QueryTerms::parse(query);
    if k == 0 || terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk> = chunks
        .par_iter()
        .filter_map(|chunk| {
            let found = terms.match_text(chunk.text());
            found.is_match().then(|| ScoredChunk {
                chunk: chunk.clone(),
                score: found.score(char_len(chunk.text())),
            })
        })
        .collect();

    sort_by_score(&mut scored);
    scored.truncate(k);
    scored
}
