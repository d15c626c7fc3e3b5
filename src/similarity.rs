use rayon::prelude::*;

use crate::chunk_db::StoredChunk;

/// Default minimum score for a chunk to count as relevant.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.15;

/// A chunk paired with the score it earned for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Cosine similarity of two vectors, in `[-1, 1]`.
///
/// Returns 0 when the lengths differ or either vector has zero norm.
///
/// # Examples
///
/// ```
/// use pocketrag::similarity::cosine_similarity;
///
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
/// assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // Accumulate in f64 so identical vectors come out at exactly 1.
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    (sim as f32).clamp(-1.0, 1.0)
}

/// Whether every component of `v` is zero. An empty vector counts as zero.
///
/// Embedding providers return zero vectors when they are unavailable, so a
/// zero query vector means the semantic signal is missing.
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|&x| x == 0.0)
}

/// Sort scored chunks by score, highest first.
///
/// The sort is stable, so chunks with equal scores keep their input order.
pub fn sort_by_score(scored: &mut [ScoredChunk]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// The `k` chunks most similar to `query`, highest score first.
///
/// Chunks whose embedding dimension differs from the query's are skipped,
/// and so are chunks scoring below `min_similarity`. Ties keep the order of
/// `chunks`.
pub fn top_k_by_similarity(
    query: &[f32],
    chunks: &[StoredChunk],
    k: usize,
    min_similarity: f32,
) -> Vec<ScoredChunk> {
    if k == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk> = chunks
        .par_iter()
        .filter(|chunk| chunk.embedding.len() == query.len())
        .filter_map(|chunk| {
            let score = cosine_similarity(query, &chunk.embedding);
            (score >= min_similarity).then(|| ScoredChunk {
                chunk: chunk.clone(),
                score,
            })
        })
        .collect();

    sort_by_score(&mut scored);
    scored.truncate(k);
    scored
}
