//! Query text -> ranked verses.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::{Config, StoreBackend};
use crate::embedding::{EmbeddingError, Embedders};
use crate::index::PineconeClient;
use crate::store::{MemoryStore, RemoteIndexStore, StoreError, StoreQuery, VectorStore};
use crate::verse::{EmbeddingType, Verse};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SearchError {
    /// Errors caused by the request rather than by a backend.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            SearchError::Store(StoreError::UnknownTranslation(_) | StoreError::NoIndexFor(_))
        )
    }
}

pub struct SearchEngine {
    embedders: Embedders,
    store: Box<dyn VectorStore>,
    default_translation: String,
    default_k: usize,
}

impl SearchEngine {
    pub fn new(
        embedders: Embedders,
        store: Box<dyn VectorStore>,
        default_translation: impl Into<String>,
        default_k: usize,
    ) -> Self {
        Self {
            embedders,
            store,
            default_translation: default_translation.into(),
            default_k,
        }
    }

    /// Build embedders and the configured store. Corpus files are read
    /// eagerly; models and remote clients are not contacted yet.
    pub fn from_config(config: &Config, base_path: &Path) -> anyhow::Result<Self> {
        let embedders = Embedders::from_config(config, base_path)?;

        let store: Box<dyn VectorStore> = match config.search.backend {
            StoreBackend::Memory => Box::new(MemoryStore::load(config)?),
            StoreBackend::Remote => {
                let client = PineconeClient::from_config(&config.index)
                    .context("remote store needs index credentials")?;
                Box::new(RemoteIndexStore::load(config, Arc::new(client))?)
            }
        };
        log::info!(
            "Serving {} translations from the {} store",
            store.translations().len(),
            store.name()
        );

        Ok(Self::new(
            embedders,
            store,
            config.default_translation.clone(),
            config.search.default_k,
        ))
    }

    pub fn translations(&self) -> Vec<String> {
        self.store.translations()
    }

    /// Embed `query` with the backend matching `embedding_type` and return
    /// up to `k` verses of `translation`, best first.
    pub fn search(
        &self,
        query: &str,
        embedding_type: EmbeddingType,
        translation: Option<&str>,
        only_text: bool,
        k: Option<usize>,
    ) -> Result<Vec<Verse>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        let translation = translation.unwrap_or(&self.default_translation);
        let k = k.unwrap_or(self.default_k);

        let vector = self.embedders.get(embedding_type).embed_one(query)?;
        let verses = self.store.query(&StoreQuery {
            vector: &vector,
            embedding_type,
            translation,
            k,
            only_text,
        })?;

        log::debug!(
            "{query:?}: {} verses from {translation} via {embedding_type}",
            verses.len()
        );
        Ok(verses)
    }
}
