//! Embedding providers and the service that shields callers from their
//! failures.
//!
//! An [`Embedder`] declares once, through [`Embedder::input_kind`], whether
//! it wants raw text or token ids. [`EmbeddingService`] prepares the
//! matching [`EmbeddingInput`] and turns every failure into a zero vector,
//! which the ranking code treats as "no semantic signal".

use crate::{error::Result, similarity::is_zero_vector};

/// Dimension of [`HashingEmbedder`] vectors unless configured otherwise.
pub const DEFAULT_HASHING_DIMENSION: usize = 256;

/// Maximum token ids handed to a token-id embedder by default.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// The kind of input an embedder consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    /// Token ids, truncated to `max_len`.
    TokenIds { max_len: usize },
}

/// Input prepared for an embedder according to its [`InputKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingInput<'a> {
    Text(&'a str),
    TokenIds(Vec<u32>),
}

/// A provider turning text into a fixed-dimension vector.
pub trait Embedder: Send {
    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Whether the underlying model is in memory.
    fn is_loaded(&self) -> bool;

    fn input_kind(&self) -> InputKind;

    fn encode(&mut self, input: EmbeddingInput<'_>) -> Result<Vec<f32>>;

    /// Encode several inputs. The default implementation encodes them one
    /// by one.
    fn encode_batch(
        &mut self,
        inputs: Vec<EmbeddingInput<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        inputs.into_iter().map(|input| self.encode(input)).collect()
    }
}

/// Split text into lower-cased alphanumeric words and hash each to an id.
///
/// # Examples
///
/// ```
/// use pocketrag::embedding::word_token_ids;
///
/// assert_eq!(word_token_ids("Hello, hello!").len(), 2);
/// assert_eq!(word_token_ids("Hello")[0], word_token_ids("hello")[0]);
/// assert!(word_token_ids(" ... ").is_empty());
/// ```
pub fn word_token_ids(text: &str) -> Vec<u32> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| fnv1a(&w.to_lowercase()))
        .collect()
}

fn fnv1a(word: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in word.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// An offline embedder based on feature hashing.
///
/// Each token id adds ±1 to one of `dimension` buckets and the result is
/// L2-normalised. Texts sharing words end up close together, which is
/// enough to run the whole pipeline without downloading a model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn input_kind(&self) -> InputKind {
        InputKind::TokenIds {
            max_len: DEFAULT_MAX_TOKENS,
        }
    }

    fn encode(&mut self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        let ids = match input {
            EmbeddingInput::Text(text) => word_token_ids(text),
            EmbeddingInput::TokenIds(ids) => ids,
        };

        let mut v = vec![0f32; self.dimension];
        for id in ids {
            let bucket = (id >> 1) as usize % self.dimension;
            v[bucket] += if id & 1 == 0 { 1.0 } else { -1.0 };
        }
        l2_normalize(&mut v);
        Ok(v)
    }
}

/// Wraps an [`Embedder`] so that embedding never fails.
///
/// Blank text, an encode error or a vector of the wrong length all yield a
/// zero vector of the embedder's dimension, with a warning.
pub struct EmbeddingService {
    embedder: Box<dyn Embedder>,
    kind: InputKind,
}

impl EmbeddingService {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        let kind = embedder.input_kind();
        Self { embedder, kind }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn is_loaded(&self) -> bool {
        self.embedder.is_loaded()
    }

    pub fn input_kind(&self) -> InputKind {
        self.kind
    }

    /// Direct access to the wrapped embedder, e.g. to load or unload it.
    pub fn embedder_mut(&mut self) -> &mut dyn Embedder {
        self.embedder.as_mut()
    }

    fn prepare<'a>(&self, text: &'a str) -> EmbeddingInput<'a> {
        match self.kind {
            InputKind::Text => EmbeddingInput::Text(text),
            InputKind::TokenIds { max_len } => {
                let mut ids = word_token_ids(text);
                ids.truncate(max_len);
                EmbeddingInput::TokenIds(ids)
            }
        }
    }

    fn checked(&self, result: Result<Vec<f32>>) -> Vec<f32> {
        let dimension = self.embedder.dimension();
        match result {
            Ok(v) if v.len() == dimension => v,
            Ok(v) => {
                tracing::warn!(
                    got = v.len(),
                    expected = dimension,
                    "embedding has the wrong dimension, using zero vector"
                );
                vec![0.0; dimension]
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, using zero vector");
                vec![0.0; dimension]
            }
        }
    }

    /// Embed one text.
    pub fn embed(&mut self, text: &str) -> Vec<f32> {
        if text.trim().is_empty() {
            return vec![0.0; self.embedder.dimension()];
        }
        let input = self.prepare(text);
        let result = self.embedder.encode(input);
        self.checked(result)
    }

    /// Embed several texts, keeping their order.
    ///
    /// When the batch call fails, each text is retried on its own so one
    /// bad input does not zero out the rest.
    pub fn embed_batch(&mut self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let inputs: Vec<EmbeddingInput<'_>> =
            texts.iter().map(|t| self.prepare(t)).collect();

        match self.embedder.encode_batch(inputs) {
            Ok(vectors) if vectors.len() == texts.len() => vectors
                .into_iter()
                .zip(texts)
                .map(|(v, text)| {
                    if text.trim().is_empty() {
                        vec![0.0; self.embedder.dimension()]
                    } else {
                        self.checked(Ok(v))
                    }
                })
                .collect(),
            Ok(_) | Err(_) => {
                tracing::warn!(
                    count = texts.len(),
                    "batch embedding failed, embedding one by one"
                );
                texts.iter().map(|t| self.embed(t)).collect()
            }
        }
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("kind", &self.kind)
            .field("dimension", &self.embedder.dimension())
            .finish_non_exhaustive()
    }
}

/// Whether every vector in `vectors` is zero, i.e. the embedder produced
/// no usable signal at all.
pub fn all_zero(vectors: &[Vec<f32>]) -> bool {
    !vectors.is_empty() && vectors.iter().all(|v| is_zero_vector(v))
}
