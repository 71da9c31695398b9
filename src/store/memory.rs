//! In-process store: every query scores the whole translation.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Context;

use super::{project, StoreError, StoreQuery, VectorStore};
use crate::config::Config;
use crate::corpus::{CorpusTable, VerseTable};
use crate::verse::{EmbeddingType, Verse};

/// Row-major matrix of one embedding column, one row per verse.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    dimensions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    offset: usize,
    score: f32,
}

// best first; equal scores keep the lower offset first
fn rank(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.offset.cmp(&b.offset))
}

impl EmbeddingMatrix {
    pub fn from_rows<'a>(
        rows: impl ExactSizeIterator<Item = &'a [f32]>,
    ) -> Result<Self, StoreError> {
        let mut rows = rows.peekable();
        let dimensions = rows.peek().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dimensions);

        for row in rows {
            if row.len() != dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: dimensions,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }

        Ok(Self { data, dimensions })
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dot product of `query` with every row.
    pub fn scores(&self, query: &[f32]) -> Result<Vec<f32>, StoreError> {
        if self.is_empty() {
            return Ok(vec![]);
        }
        if query.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        Ok(self
            .data
            .chunks_exact(self.dimensions)
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum())
            .collect())
    }

    /// Offsets of the `k` best rows with their scores, best first.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, StoreError> {
        let mut scored: Vec<Scored> = self
            .scores(query)?
            .into_iter()
            .enumerate()
            .map(|(offset, score)| Scored { offset, score })
            .collect();

        let k = k.min(scored.len());
        if k == 0 {
            return Ok(vec![]);
        }
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank);

        Ok(scored.into_iter().map(|s| (s.offset, s.score)).collect())
    }
}

struct Translation {
    verses: VerseTable,
    remote: EmbeddingMatrix,
    local: EmbeddingMatrix,
}

impl Translation {
    fn new(table: CorpusTable) -> Result<Self, StoreError> {
        let remote = EmbeddingMatrix::from_rows(
            table.rows().iter().map(|r| r.embedding(EmbeddingType::Remote)),
        )?;
        let local = EmbeddingMatrix::from_rows(
            table.rows().iter().map(|r| r.embedding(EmbeddingType::Local)),
        )?;

        Ok(Self {
            verses: table.into(),
            remote,
            local,
        })
    }

    fn matrix(&self, embedding_type: EmbeddingType) -> &EmbeddingMatrix {
        match embedding_type {
            EmbeddingType::Remote => &self.remote,
            EmbeddingType::Local => &self.local,
        }
    }
}

pub struct MemoryStore {
    translations: BTreeMap<String, Translation>,
}

impl MemoryStore {
    pub fn new(tables: BTreeMap<String, CorpusTable>) -> Result<Self, StoreError> {
        let translations = tables
            .into_iter()
            .map(|(name, table)| Ok((name, Translation::new(table)?)))
            .collect::<Result<_, StoreError>>()?;

        Ok(Self { translations })
    }

    /// Load every configured translation's corpus table into memory.
    pub fn load(config: &Config) -> anyhow::Result<Self> {
        let mut tables = BTreeMap::new();
        for name in config.translations.keys() {
            let path = config
                .translation_path(name)
                .with_context(|| format!("translation {name} has no corpus"))?;
            let table = CorpusTable::load(&path)
                .with_context(|| format!("failed to load {name} from {}", path.display()))?;
            tables.insert(name.clone(), table);
        }

        Self::new(tables).context("corpus table is inconsistent")
    }
}

impl VectorStore for MemoryStore {
    fn query(&self, query: &StoreQuery<'_>) -> Result<Vec<Verse>, StoreError> {
        let translation = self
            .translations
            .get(query.translation)
            .ok_or_else(|| StoreError::UnknownTranslation(query.translation.to_string()))?;

        let hits = translation
            .matrix(query.embedding_type)
            .top_k(query.vector, query.k)?;
        log::debug!(
            "{} {} hits in {}",
            hits.len(),
            query.embedding_type,
            query.translation
        );

        Ok(hits
            .into_iter()
            .filter_map(|(offset, _)| translation.verses.get(offset))
            .map(|verse| project(verse, query.only_text))
            .collect())
    }

    fn translations(&self) -> Vec<String> {
        self.translations.keys().cloned().collect()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
