//! Typed settings resolved from the persistent settings table, the
//! environment and built-in defaults.

use std::str::FromStr;

use crate::{
    chunk_db::ChunkStore,
    chunking::ChunkingConfig,
    config_db::ConfigDb,
    context::ContextConfig,
    embedding::{Embedder, EmbeddingService, HashingEmbedder},
    error::{Error, Result},
    generation::{CommandGenerator, Generator},
    hybrid::DEFAULT_EMBEDDING_WEIGHT,
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR, ModelManager},
    rag::RagService,
    sanitize::SanitizerConfig,
    search::SearchMode,
    similarity::DEFAULT_MIN_SIMILARITY,
};

/// Command line of the local model that writes answers.
pub const GENERATOR_ENV_VAR: &str = "POCKETRAG_GENERATOR";

pub const DEFAULT_TOP_K: usize = 5;

/// Keys accepted by `pocketrag config set`.
pub const SETTING_KEYS: &[&str] = &[
    "model_name",
    "embedder",
    "generator",
    "chunk_size",
    "chunk_overlap",
    "top_k",
    "min_similarity",
    "embedding_weight",
    "max_context_chars",
    "max_answer_chars",
    "search_mode",
];

/// Which embedding provider turns text into vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EmbedderKind {
    /// ColBERT model, mean pooled.
    #[default]
    Colbert,
    /// Offline feature hashing. Needs no model download.
    Hashing,
}

impl EmbedderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EmbedderKind::Colbert => "colbert",
            EmbedderKind::Hashing => "hashing",
        }
    }
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(EmbedderKind::Colbert),
            "hashing" => Ok(EmbedderKind::Hashing),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected colbert or hashing)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub model_name: String,
    pub embedder: EmbedderKind,
    /// Command line of the answer generator, if one is configured.
    pub generator: Option<String>,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub min_similarity: f32,
    pub embedding_weight: f32,
    pub search_mode: SearchMode,
    pub context: ContextConfig,
    pub sanitizer: SanitizerConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_ID.to_string(),
            embedder: EmbedderKind::default(),
            generator: None,
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            embedding_weight: DEFAULT_EMBEDDING_WEIGHT,
            search_mode: SearchMode::default(),
            context: ContextConfig::default(),
            sanitizer: SanitizerConfig::default(),
        }
    }
}

impl RagConfig {
    /// Resolve settings stored in `db`, then apply `POCKETRAG_MODEL` and
    /// `POCKETRAG_GENERATOR` on top.
    pub fn load(db: &ConfigDb) -> Result<Self> {
        let mut config = Self::from_lookup(|key| db.get_setting(key))?;

        if let Ok(model) = std::env::var(MODEL_ENV_VAR)
            && !model.trim().is_empty()
        {
            config.model_name = model;
        }
        if let Ok(command) = std::env::var(GENERATOR_ENV_VAR) {
            config.generator = non_empty(&command);
        }

        Ok(config)
    }

    /// Build a config from a settings lookup, falling back to defaults for
    /// keys that are not set.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Option<String>>,
    {
        let mut config = Self::default();

        for &key in SETTING_KEYS {
            if let Some(value) = lookup(key)? {
                config.apply(key, &value)?;
            }
        }

        if config.chunking.overlap >= config.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunking.overlap, config.chunking.chunk_size
            )));
        }

        Ok(config)
    }

    /// Set one field from its string form.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "model_name" => {
                self.model_name = value.trim().to_string();
                if self.model_name.is_empty() {
                    return Err(invalid(key, value, "must not be empty"));
                }
            }
            "embedder" => self.embedder = value.parse()?,
            "generator" => self.generator = non_empty(value),
            "chunk_size" => {
                self.chunking.chunk_size = parse_positive(key, value)?;
            }
            "chunk_overlap" => {
                self.chunking.overlap = parse(key, value)?;
            }
            "top_k" => self.top_k = parse_positive(key, value)?,
            "min_similarity" => {
                self.min_similarity = parse_in_range(key, value, -1.0, 1.0)?;
            }
            "embedding_weight" => {
                self.embedding_weight = parse_in_range(key, value, 0.0, 1.0)?;
            }
            "max_context_chars" => {
                self.context.max_chars = parse_positive(key, value)?;
            }
            "max_answer_chars" => {
                self.sanitizer.max_answer_chars = parse_positive(key, value)?;
            }
            "search_mode" => self.search_mode = value.parse()?,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

impl RagConfig {
    pub fn build_embedder(&self) -> Box<dyn Embedder> {
        match self.embedder {
            EmbedderKind::Colbert => {
                Box::new(ModelManager::with_model_id(self.model_name.clone()))
            }
            EmbedderKind::Hashing => Box::new(HashingEmbedder::default()),
        }
    }

    pub fn build_generator(&self) -> Result<Option<Box<dyn Generator>>> {
        match &self.generator {
            Some(command) => {
                let generator = CommandGenerator::from_command_line(command)?;
                Ok(Some(Box::new(generator)))
            }
            None => Ok(None),
        }
    }

    /// Wire a [`RagService`] over `store` with the configured providers and
    /// tunables.
    pub fn rag_service<S: ChunkStore>(&self, store: S) -> Result<RagService<S>> {
        let mut rag =
            RagService::new(store, EmbeddingService::new(self.build_embedder()))
                .with_context_config(self.context.clone())
                .with_sanitizer_config(self.sanitizer);
        if let Some(generator) = self.build_generator()? {
            rag = rag.with_generator(generator);
        }
        Ok(rag)
    }
}

/// Check that `value` is acceptable for `key` before it is stored.
///
/// The candidate is resolved together with the settings already in `db`,
/// so a value that conflicts with another stored setting is rejected.
pub fn validate_setting(db: &ConfigDb, key: &str, value: &str) -> Result<()> {
    check_setting_key(key)?;
    RagConfig::from_lookup(|k| {
        if k == key {
            Ok(Some(value.to_string()))
        } else {
            db.get_setting(k)
        }
    })
    .map(|_| ())
}

/// Error unless `key` is a known setting.
pub fn check_setting_key(key: &str) -> Result<()> {
    if SETTING_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(unknown_key(key))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn unknown_key(key: &str) -> Error {
    Error::Config(format!(
        "unknown setting '{key}' (known: {})",
        SETTING_KEYS.join(", ")
    ))
}

fn invalid(key: &str, value: &str, reason: &str) -> Error {
    Error::Config(format!("invalid value '{value}' for {key}: {reason}"))
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match parse::<usize>(key, value)? {
        0 => Err(invalid(key, value, "must be greater than zero")),
        n => Ok(n),
    }
}

fn parse_in_range(key: &str, value: &str, min: f32, max: f32) -> Result<f32> {
    let parsed = parse::<f32>(key, value)?;
    if parsed.is_finite() && (min..=max).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(invalid(key, value, &format!("must be between {min} and {max}")))
    }
}
