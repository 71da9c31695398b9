//! Embedding generation for verses and queries.
//!
//! Two backends sit behind the same [`EmbeddingProvider`] contract:
//!
//! - `remote`: OpenAI-compatible embedding API with bounded retry on batch calls
//! - `local`: fastembed sentence-embedding model, lazily loaded
//!
//! [`Embedders`] pairs one of each and hands out the provider matching an
//! [`EmbeddingType`], so a corpus and its queries always share a backend.

mod local;
mod remote;
mod retry;

use std::path::Path;
use std::sync::Arc;

pub use local::LocalEmbedder;
pub use remote::{EmbeddingApi, RemoteEmbedder};
pub use retry::RetryPolicy;

use crate::config::Config;
use crate::verse::EmbeddingType;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    /// Network failure, rate limit or provider-side 5xx.
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Provider rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Expected {expected}-dimensional embedding, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<EmbeddingError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// Text to vector contract shared by both backends.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts; output order matches input order.
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Fixed dimensionality of every vector this provider returns.
    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}

/// One provider per [`EmbeddingType`].
#[derive(Clone)]
pub struct Embedders {
    remote: Arc<dyn EmbeddingProvider>,
    local: Arc<dyn EmbeddingProvider>,
}

impl Embedders {
    pub fn new(remote: Arc<dyn EmbeddingProvider>, local: Arc<dyn EmbeddingProvider>) -> Self {
        Self { remote, local }
    }

    /// Build both backends from configuration.
    ///
    /// Nothing is downloaded or contacted here: the local model loads on
    /// first use and the remote client only validates its settings.
    pub fn from_config(config: &Config, base_path: &Path) -> Result<Self, EmbeddingError> {
        let remote = RemoteEmbedder::from_config(&config.remote_embedding)?;
        let local = LocalEmbedder::new(&config.local_embedding, base_path.to_path_buf())?;

        Ok(Self::new(Arc::new(remote), Arc::new(local)))
    }

    pub fn get(&self, embedding_type: EmbeddingType) -> &dyn EmbeddingProvider {
        match embedding_type {
            EmbeddingType::Remote => self.remote.as_ref(),
            EmbeddingType::Local => self.local.as_ref(),
        }
    }
}

/// Checks every vector against the provider's declared dimensionality.
pub(crate) fn check_dimensions(
    vectors: &[Vec<f32>],
    expected: usize,
) -> Result<(), EmbeddingError> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(EmbeddingError::DimensionMismatch {
            expected,
            got: v.len(),
        }),
        None => Ok(()),
    }
}
