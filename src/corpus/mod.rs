//! Verse tables and the corpus encoding job.
//!
//! - `clean`: normalizes raw translation CSVs
//! - `table`: verse CSV reading, parquet corpus tables
//! - `encoder`: batches verses through both embedding backends

mod clean;
mod encoder;
mod table;

pub use clean::clean;
pub use encoder::{CorpusEncoder, EncodeOptions};
pub use table::{read_batches, CorpusTable, CorpusWriter, VerseRecord, VerseTable};

use crate::embedding::EmbeddingError;

/// Errors that can occur while reading, writing or encoding a corpus.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Not a corpus table: {0}")]
    Schema(String),

    #[error("Corpus holds {column} vectors of {expected} dimensions, batch has {got}")]
    DimensionMismatch {
        column: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Batch {index} ({first} .. {last}, {size} verses) failed: {source}")]
    Batch {
        index: usize,
        first: String,
        last: String,
        size: usize,
        source: EmbeddingError,
    },
}
