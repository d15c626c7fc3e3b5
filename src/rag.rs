//! The question answering pipeline: retrieve, assemble, generate, clean up.

use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    chunk_db::{ChunkStore, StoredChunk},
    config::{DEFAULT_TOP_K, RagConfig},
    config_db::ConfigDb,
    context::{ContextConfig, assemble_chunks},
    embedding::EmbeddingService,
    error::Result,
    generation::{Generator, PromptTemplate},
    hybrid::DEFAULT_EMBEDDING_WEIGHT,
    ingestion::{IngestOptions, IngestOutcome, ingest_document},
    sanitize::{SanitizerConfig, sanitize},
    search::{SearchMode, rank},
    similarity::{DEFAULT_MIN_SIMILARITY, ScoredChunk, is_zero_vector},
    text_util::preview,
};

/// Answer given when retrieval finds nothing relevant.
pub const NO_INFORMATION_ANSWER: &str = "No information about this topic \
was found in the loaded documents. Try asking a more specific question.";

/// Answer given when the generator fails or returns nothing usable.
pub const FALLBACK_ANSWER: &str = "[No answer could be generated.]";

/// Per-query retrieval parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AskOptions {
    pub top_k: usize,
    /// Restrict retrieval to these documents. `None` or an empty list
    /// searches everything.
    pub document_ids: Option<Vec<String>>,
    pub min_similarity: f32,
    pub mode: SearchMode,
    pub embedding_weight: f32,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            document_ids: None,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            mode: SearchMode::Hybrid,
            embedding_weight: DEFAULT_EMBEDDING_WEIGHT,
        }
    }
}

impl AskOptions {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            top_k: config.top_k,
            document_ids: None,
            min_similarity: config.min_similarity,
            mode: config.search_mode,
            embedding_weight: config.embedding_weight,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_document_ids(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = Some(document_ids);
        self
    }

    fn document_filter(&self) -> Option<&[String]> {
        self.document_ids.as_deref().filter(|ids| !ids.is_empty())
    }
}

/// A citation: one page of one document that contributed to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSource {
    pub document_id: String,
    pub page_number: u32,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResult {
    pub answer: String,
    /// Best first, at most one per (document, page).
    pub sources: Vec<RagSource>,
    /// The text the answer was grounded on.
    pub context: String,
    /// The query embedding carried no signal, so ranking relied on
    /// keywords alone.
    pub degraded_embedding: bool,
}

/// Ranked chunks and the context assembled from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub chunks: Vec<ScoredChunk>,
    pub context: String,
    pub degraded_embedding: bool,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sources(&self) -> Vec<RagSource> {
        dedup_sources(&self.chunks)
    }
}

/// Collapse ranked chunks into one source per (document, page), keeping
/// the first and therefore best-scored occurrence.
pub fn dedup_sources(ranked: &[ScoredChunk]) -> Vec<RagSource> {
    let mut seen = HashSet::new();
    ranked
        .iter()
        .filter(|s| {
            let chunk = &s.chunk.chunk;
            seen.insert((chunk.document_id.clone(), chunk.page_number))
        })
        .map(|s| RagSource {
            document_id: s.chunk.chunk.document_id.clone(),
            page_number: s.chunk.chunk.page_number,
            score: s.score,
        })
        .collect()
}

/// Retrieval-augmented question answering over a [`ChunkStore`].
pub struct RagService<S> {
    store: S,
    embeddings: EmbeddingService,
    generator: Option<Box<dyn Generator>>,
    prompt: PromptTemplate,
    context: ContextConfig,
    sanitizer: SanitizerConfig,
}

impl<S: ChunkStore> RagService<S> {
    pub fn new(store: S, embeddings: EmbeddingService) -> Self {
        Self {
            store,
            embeddings,
            generator: None,
            prompt: PromptTemplate::default(),
            context: ContextConfig::default(),
            sanitizer: SanitizerConfig::default(),
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_context_config(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn with_sanitizer_config(mut self, sanitizer: SanitizerConfig) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embeddings(&mut self) -> &mut EmbeddingService {
        &mut self.embeddings
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Ingest a document into this service's store with its embedder.
    pub fn ingest(
        &mut self,
        path: &Path,
        registry: &ConfigDb,
        options: &IngestOptions,
    ) -> Result<IngestOutcome> {
        ingest_document(
            path,
            &self.store,
            registry,
            &mut self.embeddings,
            options,
        )
    }

    fn candidates(&self, options: &AskOptions) -> Result<Vec<StoredChunk>> {
        match options.document_filter() {
            Some(ids) => self.store.get_by_document_ids(ids),
            None => self.store.get_all(),
        }
    }

    /// Rank stored chunks for `query` and assemble their context, without
    /// generating an answer.
    ///
    /// Only store errors are returned. A failing embedder degrades the
    /// query to keyword matching.
    pub fn retrieve(
        &mut self,
        query: &str,
        options: &AskOptions,
    ) -> Result<Retrieval> {
        let chunks = self.candidates(options)?;

        let query_embedding = self.embeddings.embed(query);
        let degraded_embedding = is_zero_vector(&query_embedding);
        if degraded_embedding {
            tracing::warn!(
                "query embedding is all zeros, ranking by keywords only"
            );
        }

        let ranked = rank(
            options.mode,
            &query_embedding,
            query,
            &chunks,
            options.top_k,
            options.min_similarity,
            options.embedding_weight,
        );
        tracing::debug!(
            candidates = chunks.len(),
            retrieved = ranked.len(),
            mode = %options.mode,
            "retrieval finished"
        );
        for scored in &ranked {
            tracing::debug!(
                chunk = scored.chunk.id(),
                page = scored.chunk.chunk.page_number,
                score = scored.score,
                "retrieved chunk"
            );
        }

        let context = assemble_chunks(&ranked, &self.context);
        tracing::debug!(chars = context.chars().count(), "assembled context");

        Ok(Retrieval {
            chunks: ranked,
            context,
            degraded_embedding,
        })
    }

    /// Answer `query` from the stored documents.
    ///
    /// Nothing relevant found yields [`NO_INFORMATION_ANSWER`] with no
    /// sources. A missing or failing generator yields [`FALLBACK_ANSWER`]
    /// with the sources that were found.
    pub fn ask(&mut self, query: &str, options: &AskOptions) -> Result<RagResult> {
        let retrieval = self.retrieve(query, options)?;

        if retrieval.is_empty() {
            tracing::info!("no relevant chunks found");
            return Ok(RagResult {
                answer: NO_INFORMATION_ANSWER.to_string(),
                sources: Vec::new(),
                context: retrieval.context,
                degraded_embedding: retrieval.degraded_embedding,
            });
        }

        let answer = self.generate_answer(query, &retrieval.context);
        Ok(RagResult {
            answer,
            sources: retrieval.sources(),
            context: retrieval.context,
            degraded_embedding: retrieval.degraded_embedding,
        })
    }

    fn generate_answer(&mut self, query: &str, context: &str) -> String {
        let Some(generator) = self.generator.as_mut() else {
            tracing::warn!("no generator configured");
            return FALLBACK_ANSWER.to_string();
        };

        let prompt = self.prompt.render(context, query);
        tracing::debug!(chars = prompt.chars().count(), "prompt built");

        let raw = match generator.generate(&prompt) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "generation failed");
                return FALLBACK_ANSWER.to_string();
            }
        };
        tracing::debug!(raw = %preview(&raw, 200), "raw answer");

        let answer = sanitize(&raw, &self.sanitizer);
        if answer.is_empty() {
            tracing::warn!("answer was empty after clean-up");
            return FALLBACK_ANSWER.to_string();
        }
        answer
    }
}

impl<S> std::fmt::Debug for RagService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("embeddings", &self.embeddings)
            .field("generator", &self.generator.is_some())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
