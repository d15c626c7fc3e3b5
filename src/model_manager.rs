use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::{Embedder, EmbeddingInput, InputKind, l2_normalize},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "POCKETRAG_MODEL";

/// Output dimension of the default model, reported until a model has
/// produced its first embedding.
pub const DEFAULT_MODEL_DIMENSION: usize = 128;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn model_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Model(format!("{context}: {e}"))
}

/// Manages the lifecycle of a ColBERT model used as a single-vector
/// embedder.
///
/// The model is loaded on first use or by an explicit [`ModelManager::load`],
/// and released again by [`ModelManager::unload`]. A text's embedding is
/// the L2-normalised mean of its token embeddings.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
    dimension: usize,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `POCKETRAG_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`lightonai/GTE-ModernColBERT-v1`)
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
            dimension: DEFAULT_MODEL_DIMENSION,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Loads the model, downloading it from HuggingFace Hub if needed.
    /// Does nothing when it is already loaded.
    pub fn load(&mut self) -> Result<()> {
        self.ensure_loaded().map(|_| ())
    }

    /// Releases the model. The next encode loads it again.
    pub fn unload(&mut self) {
        if self.model.take().is_some() {
            tracing::info!(model = %self.model_id, "unloaded embedding model");
        }
    }

    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                tracing::info!(model = %self.model_id, "loading embedding model");
                let device = default_device();
                let colbert: ColBERT = ColBERT::from(&self.model_id)
                    .with_device(device)
                    .try_into()
                    .map_err(|e| model_error("failed to load model", e))?;
                colbert
            }
        };
        Ok(self.model.insert(model))
    }

    /// Encodes texts into one mean-pooled, normalised vector each.
    pub fn encode_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.ensure_loaded()?;
        // [batch, tokens, dimension]
        let embeddings = model
            .encode(texts, false)
            .map_err(|e| model_error("encoding failed", e))?;

        let mut vectors = Vec::with_capacity(texts.len());
        for i in 0..texts.len() {
            let tokens = embeddings
                .get(i)
                .map_err(|e| model_error("missing embedding in batch", e))?;
            vectors.push(mean_pool(&tokens)?);
        }

        if let Some(first) = vectors.first() {
            self.dimension = first.len();
        }
        Ok(vectors)
    }
}

/// Average a `[tokens, dimension]` tensor over its tokens and normalise.
fn mean_pool(tokens: &Tensor) -> Result<Vec<f32>> {
    let mut pooled = tokens
        .mean(0)
        .map_err(|e| model_error("failed to pool token embeddings", e))?
        .to_vec1::<f32>()
        .map_err(|e| model_error("failed to convert tensor to f32", e))?;
    l2_normalize(&mut pooled);
    Ok(pooled)
}

impl Embedder for ModelManager {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Text
    }

    fn encode(&mut self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        let EmbeddingInput::Text(text) = input else {
            return Err(Error::Model(
                "ColBERT models take text input".to_string(),
            ));
        };
        self.encode_texts(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::Model("empty embedding batch".to_string()))
    }

    fn encode_batch(
        &mut self,
        inputs: Vec<EmbeddingInput<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        let texts = inputs
            .into_iter()
            .map(|input| match input {
                EmbeddingInput::Text(text) => Ok(text.to_string()),
                EmbeddingInput::TokenIds(_) => Err(Error::Model(
                    "ColBERT models take text input".to_string(),
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        self.encode_texts(&texts)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.model.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn unloaded_model_reports_default_dimension_and_text_input() {
        let mut manager =
            ModelManager::with_model_id(DEFAULT_MODEL_ID.to_string());
        assert_eq!(manager.dimension(), DEFAULT_MODEL_DIMENSION);
        assert_eq!(manager.input_kind(), InputKind::Text);

        manager.unload();
        assert!(!manager.is_loaded());
    }

    #[test]
    fn token_ids_are_rejected() {
        let mut manager = ModelManager::with_model_id("unused".to_string());
        let err = manager
            .encode(EmbeddingInput::TokenIds(vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(!manager.is_loaded());
    }

    #[test]
    fn mean_pool_averages_and_normalizes() {
        let tokens =
            Tensor::from_vec(vec![1.0f32, 0.0, 3.0, 4.0], (2, 2), &Device::Cpu)
                .unwrap();
        // mean = [2, 2] -> [0.7071, 0.7071]
        let pooled = mean_pool(&tokens).unwrap();
        assert_eq!(pooled.len(), 2);
        assert!((pooled[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((pooled[1] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}
