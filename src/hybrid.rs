//! Fusion of embedding similarity and keyword matching into one ranking.

use rayon::prelude::*;

use crate::{
    chunk_db::StoredChunk,
    keyword::QueryTerms,
    similarity::{ScoredChunk, cosine_similarity, sort_by_score},
};

/// Embedding weight used when answering questions.
pub const DEFAULT_EMBEDDING_WEIGHT: f32 = 0.5;

/// Rank chunks by a weighted sum of cosine similarity and keyword match.
///
/// Each chunk whose embedding has the query's dimension contributes
/// `cosine * embedding_weight`. Each chunk matching at least one query term
/// contributes `match_ratio * (1 - embedding_weight)`. A chunk found by only
/// one path keeps that path's score. Chunks scoring at least `min_score`
/// are returned, highest first, at most `k` of them.
///
/// `embedding_weight` is clamped into `[0, 1]`.
pub fn hybrid_search(
    query_embedding: &[f32],
    query_text: &str,
    chunks: &[StoredChunk],
    k: usize,
    min_score: f32,
    embedding_weight: f32,
) -> Vec<ScoredChunk> {
    if k == 0 || chunks.is_empty() {
        return Vec::new();
    }

    let embedding_weight = embedding_weight.clamp(0.0, 1.0);
    let keyword_weight = 1.0 - embedding_weight;
    let terms = QueryTerms::parse(query_text);
    let dim = query_embedding.len();

    let mut scored: Vec<ScoredChunk> = chunks
        .par_iter()
        .filter_map(|chunk| {
            let semantic = (dim > 0 && chunk.embedding.len() == dim).then(|| {
                cosine_similarity(query_embedding, &chunk.embedding)
                    * embedding_weight
            });

            let lexical = if terms.is_empty() {
                None
            } else {
                let found = terms.match_text(chunk.text());
                found
                    .is_match()
                    .then(|| found.match_ratio() * keyword_weight)
            };

            let score = match (semantic, lexical) {
                (None, None) => return None,
                (s, l) => s.unwrap_or(0.0) + l.unwrap_or(0.0),
            };

            (score >= min_score).then(|| ScoredChunk {
                chunk: chunk.clone(),
                score,
            })
        })
        .collect();

    sort_by_score(&mut scored);
    scored.truncate(k);
    scored
}
