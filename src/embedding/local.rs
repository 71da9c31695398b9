//! Local embedding backend wrapping fastembed.
//!
//! - Lazy model loading with configurable cache directory
//! - Native batching, no retry (no network involved once cached)

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

use super::{check_dimensions, EmbeddingError, EmbeddingProvider};
use crate::config::LocalEmbeddingConfig;

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self, and the model
/// is only loaded on first use.
pub struct LocalEmbedder {
    model: Mutex<Option<TextEmbedding>>,
    model_enum: fastembed::EmbeddingModel,
    model_name: String,
    dimensions: usize,
    cache_dir: PathBuf,
}

impl LocalEmbedder {
    /// Create a local embedder for the configured model.
    ///
    /// The model is downloaded into `<base_path>/models` the first time a text
    /// is embedded, not here.
    pub fn new(config: &LocalEmbeddingConfig, base_path: PathBuf) -> Result<Self, EmbeddingError> {
        let (model_enum, dimensions) = Self::parse_model_name(&config.model)?;

        Ok(Self {
            model: Mutex::new(None),
            model_enum,
            model_name: config.model.clone(),
            dimensions,
            cache_dir: base_path.join("models"),
        })
    }

    #[cfg(test)]
    fn is_loaded(&self) -> bool {
        self.model
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn with_model<R>(
        &self,
        f: impl FnOnce(&mut TextEmbedding) -> Result<R, EmbeddingError>,
    ) -> Result<R, EmbeddingError> {
        let mut guard = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        if guard.is_none() {
            *guard = Some(self.load()?);
        }

        match guard.as_mut() {
            Some(model) => f(model),
            None => Err(EmbeddingError::InitFailed("model not loaded".to_string())),
        }
    }

    fn load(&self) -> Result<TextEmbedding, EmbeddingError> {
        log::info!("Loading local embedding model '{}'", self.model_name);

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(self.model_enum.clone())
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(true);

        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
    }

    /// Parse model name string to fastembed enum and its output size.
    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, usize), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384))
            }
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok((fastembed::EmbeddingModel::AllMiniLML6V2Q, 384))
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok((fastembed::EmbeddingModel::BGESmallENV15, 384))
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768))
            }
            "bge-large-en-v1.5" | "bgelargeenv15" => {
                Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024))
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                name
            ))),
        }
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self.with_model(|model| {
            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
        })?;
        check_dimensions(&embeddings, self.dimensions)?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let embeddings = self.with_model(|model| {
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
        })?;
        check_dimensions(&embeddings, self.dimensions)?;

        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}
