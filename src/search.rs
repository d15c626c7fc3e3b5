use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    chunk_db::StoredChunk,
    error::{Error, Result},
    hybrid::hybrid_search,
    keyword::top_k_by_keyword,
    similarity::{ScoredChunk, top_k_by_similarity},
    text_util::{DEFAULT_PREVIEW_CHARS, preview},
};

/// Which retrieval path ranks the chunks.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Embedding similarity and keyword match combined.
    #[default]
    Hybrid,
    /// Embedding similarity only.
    Semantic,
    /// Keyword match only.
    Keyword,
}

impl SearchMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            other => Err(Error::Config(format!(
                "unknown search mode '{other}' \
                 (expected hybrid, semantic or keyword)"
            ))),
        }
    }
}

/// Rank `chunks` for a query with the chosen retrieval path.
///
/// Every path returns at most `k` chunks scoring at least `min_score`,
/// highest first. `embedding_weight` only matters for
/// [`SearchMode::Hybrid`].
pub fn rank(
    mode: SearchMode,
    query_embedding: &[f32],
    query_text: &str,
    chunks: &[StoredChunk],
    k: usize,
    min_score: f32,
    embedding_weight: f32,
) -> Vec<ScoredChunk> {
    match mode {
        SearchMode::Hybrid => hybrid_search(
            query_embedding,
            query_text,
            chunks,
            k,
            min_score,
            embedding_weight,
        ),
        SearchMode::Semantic => {
            top_k_by_similarity(query_embedding, chunks, k, min_score)
        }
        SearchMode::Keyword => {
            let mut ranked = top_k_by_keyword(query_text, chunks, k);
            ranked.retain(|r| r.score >= min_score);
            ranked
        }
    }
}

/// A ranked chunk prepared for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub score: f32,
    pub document_id: String,
    pub document_name: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub preview: String,
}

/// Number ranked chunks from 1 and attach document names.
///
/// `names` maps document ids to display names; unknown ids show the short
/// id instead.
pub fn to_results(
    ranked: &[ScoredChunk],
    names: &HashMap<String, String>,
) -> Vec<SearchResult> {
    ranked
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            let chunk = &scored.chunk.chunk;
            let document_name =
                names.get(&chunk.document_id).cloned().unwrap_or_else(|| {
                    let id = &chunk.document_id;
                    format!("#{}", &id[..id.len().min(8)])
                });
            SearchResult {
                rank: i + 1,
                score: scored.score,
                document_id: chunk.document_id.clone(),
                document_name,
                page_number: chunk.page_number,
                chunk_index: chunk.chunk_index,
                preview: preview(&chunk.text, DEFAULT_PREVIEW_CHARS),
            }
        })
        .collect()
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!(
            "{:>3}. [{:.3}] {} p.{} #{}",
            r.rank,
            r.score,
            r.document_name,
            r.page_number,
            &r.document_id[..r.document_id.len().min(8)]
        );
        if !r.preview.is_empty() {
            println!("     {}", r.preview);
        }
    }
    println!("\n{} result(s)", results.len());
}

pub fn results_json(
    results: &[SearchResult],
    query: &str,
    mode: SearchMode,
) -> serde_json::Value {
    serde_json::json!({
        "query": query,
        "mode": mode,
        "result_count": results.len(),
        "results": results,
    })
}

/// Format results as JSON output.
pub fn format_json(
    results: &[SearchResult],
    query: &str,
    mode: SearchMode,
) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&results_json(results, query, mode))?
    );
    Ok(())
}
