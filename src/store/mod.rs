//! Vector stores answering nearest-verse queries.
//!
//! - `memory`: corpus tables with inline embeddings, scored in process
//! - `remote`: verse tables locally, vectors in the managed index

mod memory;
mod remote;

pub use memory::MemoryStore;
pub use remote::RemoteIndexStore;

use crate::index::IndexError;
use crate::verse::{EmbeddingType, Verse};

/// Errors that can occur while querying a vector store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unknown translation: {0}")]
    UnknownTranslation(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Index returned id {0:?} that matches no verse")]
    UnresolvedId(String),

    #[error("No index configured for {0} embeddings")]
    NoIndexFor(EmbeddingType),
}

/// A single nearest-neighbour lookup.
#[derive(Debug, Clone)]
pub struct StoreQuery<'a> {
    pub vector: &'a [f32],
    pub embedding_type: EmbeddingType,
    pub translation: &'a str,
    pub k: usize,
    /// Drop book/chapter/verse from the results.
    pub only_text: bool,
}

pub trait VectorStore: Send + Sync {
    /// Up to `k` verses, best match first.
    fn query(&self, query: &StoreQuery<'_>) -> Result<Vec<Verse>, StoreError>;

    /// Translations this store can answer for.
    fn translations(&self) -> Vec<String>;

    fn name(&self) -> &'static str;
}

fn project(verse: &Verse, only_text: bool) -> Verse {
    if only_text {
        verse.text_only()
    } else {
        verse.clone()
    }
}
