//! Splitting extracted page text into overlapping, word-aligned chunks.
//!
//! Each page is cut into windows of at most `chunk_size` characters. A
//! window that does not reach the end of the page is pulled back to the
//! last whitespace inside it so no word is split, and the next window
//! starts `overlap` characters before the adjusted end. Overlap lets a
//! sentence that straddles a boundary be retrieved from either side.

use serde::{Deserialize, Serialize};

/// Default chunk size in characters. Small chunks give sharper embedding
/// matches against short questions.
pub const DEFAULT_CHUNK_SIZE: usize = 400;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 80;

/// Chunk size used by the legacy, non-overlapping layout.
pub const LEGACY_CHUNK_SIZE: usize = 500;

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use pocketrag::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert_eq!(ChunkingConfig::legacy().overlap, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl ChunkingConfig {
    /// 400-character windows with 80 characters of overlap.
    pub const fn calibrated() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }

    /// 500-character windows without overlap.
    pub const fn legacy() -> Self {
        Self {
            chunk_size: LEGACY_CHUNK_SIZE,
            overlap: 0,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::calibrated()
    }
}

/// A chunk of a document's extracted text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Store key, see [`chunk_id`].
    pub id: String,
    pub document_id: String,
    /// 1-based page the text was extracted from.
    pub page_number: u32,
    /// Running position of the chunk within the whole document.
    pub chunk_index: u32,
    pub text: String,
}

/// Build the store key for a chunk.
///
/// Keys sort by document and then by chunk index, so all chunks of one
/// document form a contiguous key range starting with `"{document_id}/"`.
///
/// # Examples
///
/// ```
/// use pocketrag::chunking::chunk_id;
///
/// assert_eq!(chunk_id("a1b2c3", 7), "a1b2c3/000007");
/// ```
pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
    format!("{document_id}/{chunk_index:06}")
}

/// Split one page of text into trimmed, non-empty pieces.
///
/// Blank input yields no pieces. Every piece is at most `chunk_size`
/// characters long.
///
/// # Examples
///
/// ```
/// use pocketrag::chunking::chunk_text;
///
/// assert!(chunk_text("   ", 400, 80).is_empty());
///
/// let pieces = chunk_text("alpha beta gamma delta", 12, 0);
/// assert_eq!(pieces, vec!["alpha beta", "gamma delta"]);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    let char_count = chars.len();

    // Build a map of char index -> byte index for O(1) slicing
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut pieces = Vec::new();
    let mut start = 0;

    loop {
        let mut end = (start + chunk_size).min(char_count);
        if end < char_count
            && let Some(ws) = last_whitespace(&chars, start, end)
        {
            end = ws + 1;
        }

        let piece = text[char_to_byte[start]..char_to_byte[end]].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        if end >= char_count {
            break;
        }

        let next = end.saturating_sub(overlap).min(char_count);
        // An overlap wider than the adjusted window would walk backwards.
        start = if next > start { next } else { end };
    }

    pieces
}

/// Index of the last whitespace char in `chars[start..end]`.
fn last_whitespace(chars: &[char], start: usize, end: usize) -> Option<usize> {
    (start..end).rev().find(|&i| chars[i].is_whitespace())
}

/// Chunk every page of a document.
///
/// Pages are numbered from 1 in iteration order. `chunk_index` runs across
/// the whole document and is not reset per page.
pub fn chunk_pages<'a, I>(
    pages: I,
    document_id: &str,
    config: ChunkingConfig,
) -> Vec<Chunk>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut chunks = Vec::new();

    for (page_idx, page_text) in pages.into_iter().enumerate() {
        let page_number = page_idx as u32 + 1;
        for text in chunk_text(page_text, config.chunk_size, config.overlap) {
            let chunk_index = chunks.len() as u32;
            chunks.push(Chunk {
                id: chunk_id(document_id, chunk_index),
                document_id: document_id.to_string(),
                page_number,
                chunk_index,
                text,
            });
        }
    }

    chunks
}
