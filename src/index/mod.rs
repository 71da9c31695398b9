//! Managed vector index: service contract, Pinecone client, vector ids and
//! the one-shot build pipeline.

mod builder;
mod ids;
mod pinecone;

pub use builder::{BuildOptions, BuildState, IndexBuilder};
pub use ids::{location_id, IdResolver};
pub use pinecone::PineconeClient;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur talking to the index service or building an index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index {0} is not ready")]
    NotReady(String),

    #[error("Corpus is empty, cannot size index {0}")]
    EmptyCorpus(String),

    #[error("Gave up after {waited:?} waiting for index {index} to be {condition}")]
    Timeout {
        index: String,
        condition: &'static str,
        waited: Duration,
    },

    #[error("Index {index} acknowledged {upserted} of {sent} vectors")]
    UpsertMismatch {
        index: String,
        sent: usize,
        upserted: usize,
    },
}

/// Parameters for creating an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub pod_type: String,
}

impl IndexSpec {
    /// Dot-product index; vectors are expected to be unit-normalized.
    pub fn dot_product(name: &str, dimension: usize, pod_type: &str) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            metric: "dotproduct".to_string(),
            pod_type: pod_type.to_string(),
        }
    }
}

/// A vector to upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
}

/// One query hit, best-first in the returned list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Match {
    pub id: String,
    #[serde(default)]
    pub score: f32,
}

/// Remote nearest-neighbour index, partitioned by namespace.
pub trait IndexService: Send + Sync {
    fn list_indexes(&self) -> Result<Vec<String>, IndexError>;

    /// Creation is asynchronous; poll [`IndexService::index_ready`] before
    /// writing to the new index.
    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError>;

    /// Whether the index accepts reads and writes.
    fn index_ready(&self, name: &str) -> Result<bool, IndexError>;

    /// Irreversibly removes the index and every namespace in it. The name
    /// keeps showing up in [`IndexService::list_indexes`] until the deletion
    /// has finished.
    fn delete_index(&self, name: &str) -> Result<(), IndexError>;

    /// Returns the number of vectors the service reports as upserted.
    fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[VectorRecord],
    ) -> Result<usize, IndexError>;

    /// Empty when nothing matches.
    fn query(
        &self,
        index: &str,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError>;
}
