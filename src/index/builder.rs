//! One-shot population of remote indexes from a corpus table.
//!
//! `NotProvisioned -> Provisioning -> Populating -> Ready`. Index creation
//! and deletion finish asynchronously on the service side, so provisioning
//! polls until a deleted index is gone and a created one is ready. Upsert
//! failures are not retried; they abort the build and leave the namespace
//! partially populated.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::{IdResolver, IndexError, IndexService, IndexSpec, VectorRecord};
use crate::config::IdScheme;
use crate::corpus::CorpusTable;
use crate::verse::EmbeddingType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotProvisioned,
    Provisioning,
    Populating,
    Ready,
}

impl Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildState::NotProvisioned => "not provisioned",
            BuildState::Provisioning => "provisioning",
            BuildState::Populating => "populating",
            BuildState::Ready => "ready",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Translation name, used as the namespace.
    pub namespace: String,
    /// Drop and recreate indexes that already exist.
    pub delete_if_exists: bool,
    pub chunk_size: usize,
    pub pod_type: String,
    pub id_scheme: IdScheme,
    /// Upper bound on each wait for an index to appear or disappear.
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Indexes provisioned, in config order.
    pub indexes: Vec<String>,
    /// Index name -> vectors upserted into the namespace.
    pub upserted: BTreeMap<String, usize>,
}

pub struct IndexBuilder<'a> {
    service: &'a dyn IndexService,
    indexes: &'a BTreeMap<String, EmbeddingType>,
    state: BuildState,
    sleep: Arc<dyn Fn(Duration) + Send + Sync>,
}

/// Split `total` rows into upsert chunks of roughly `target` rows.
///
/// `splits = round(total / target)`; with one split or fewer every row goes in
/// a single chunk, otherwise the rows are cut into `splits` contiguous chunks
/// whose sizes differ by at most one (earlier chunks take the remainder).
pub fn chunk_ranges(total: usize, target: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return vec![];
    }

    let splits = (total as f64 / target.max(1) as f64).round() as usize;
    if splits <= 1 {
        return vec![0..total];
    }

    let base = total / splits;
    let remainder = total % splits;
    let mut start = 0;

    (0..splits)
        .map(|i| {
            let len = base + usize::from(i < remainder);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

impl<'a> IndexBuilder<'a> {
    pub fn new(
        service: &'a dyn IndexService,
        indexes: &'a BTreeMap<String, EmbeddingType>,
    ) -> Self {
        Self {
            service,
            indexes,
            state: BuildState::NotProvisioned,
            sleep: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the sleep used between readiness polls.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    fn transition(&mut self, state: BuildState) {
        log::info!("index build: {} -> {}", self.state, state);
        self.state = state;
    }

    /// Provision every configured index and upsert the whole corpus into
    /// `opts.namespace`.
    pub fn build(
        &mut self,
        table: &CorpusTable,
        opts: &BuildOptions,
    ) -> Result<BuildReport, IndexError> {
        self.transition(BuildState::Provisioning);
        for (name, embedding_type) in self.indexes {
            let dimension = table
                .dimensions(*embedding_type)
                .ok_or_else(|| IndexError::EmptyCorpus(name.clone()))?;
            self.provision(name, dimension, opts)?;
        }
        let indexes = self.indexes.keys().cloned().collect();

        self.transition(BuildState::Populating);
        let mut report = BuildReport {
            indexes,
            ..Default::default()
        };
        for (name, embedding_type) in self.indexes {
            let upserted = self.populate(name, *embedding_type, table, opts)?;
            report.upserted.insert(name.clone(), upserted);
        }

        self.transition(BuildState::Ready);
        Ok(report)
    }

    fn provision(
        &self,
        name: &str,
        dimension: usize,
        opts: &BuildOptions,
    ) -> Result<(), IndexError> {
        let exists = self.service.list_indexes()?.iter().any(|i| i == name);

        if exists && opts.delete_if_exists {
            log::warn!("index {name} exists, deleting it");
            self.service.delete_index(name)?;
            self.wait_for(name, "deleted", opts, || {
                Ok(!self.service.list_indexes()?.iter().any(|i| i == name))
            })?;
        } else if exists {
            // schema is not re-validated; a dimension mismatch surfaces at upsert
            log::info!("reusing existing index {name}");
            return Ok(());
        }

        self.service
            .create_index(&IndexSpec::dot_product(name, dimension, &opts.pod_type))?;
        self.wait_for(name, "ready", opts, || self.service.index_ready(name))
    }

    /// Poll `done` every `opts.poll_interval` until it holds, giving up once
    /// `opts.ready_timeout` has been spent sleeping.
    fn wait_for(
        &self,
        name: &str,
        condition: &'static str,
        opts: &BuildOptions,
        mut done: impl FnMut() -> Result<bool, IndexError>,
    ) -> Result<(), IndexError> {
        let mut waited = Duration::ZERO;

        loop {
            if done()? {
                return Ok(());
            }
            if waited >= opts.ready_timeout {
                return Err(IndexError::Timeout {
                    index: name.to_string(),
                    condition,
                    waited,
                });
            }

            log::info!(
                "waiting for index {name} to be {condition} ({}s so far)",
                waited.as_secs()
            );
            (*self.sleep)(opts.poll_interval);
            waited += opts.poll_interval;
        }
    }

    fn populate(
        &self,
        name: &str,
        embedding_type: EmbeddingType,
        table: &CorpusTable,
        opts: &BuildOptions,
    ) -> Result<usize, IndexError> {
        let chunks = chunk_ranges(table.len(), opts.chunk_size);
        log::info!(
            "upserting {} {} vectors into {name}/{} in {} chunks",
            table.len(),
            embedding_type,
            opts.namespace,
            chunks.len()
        );

        let progress = ProgressBar::new(table.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} vectors ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut upserted = 0;
        for range in chunks {
            let vectors = table.rows()[range.clone()]
                .iter()
                .zip(range.clone())
                .map(|(row, offset)| {
                    let id = IdResolver::id_for(opts.id_scheme, offset, &row.verse())
                        .unwrap_or_else(|| offset.to_string());
                    VectorRecord {
                        id,
                        values: row.embedding(embedding_type).to_vec(),
                    }
                })
                .collect::<Vec<_>>();

            let acknowledged = self.service.upsert(name, &opts.namespace, &vectors)?;
            if acknowledged != vectors.len() {
                return Err(IndexError::UpsertMismatch {
                    index: name.to_string(),
                    sent: vectors.len(),
                    upserted: acknowledged,
                });
            }
            upserted += acknowledged;
            progress.inc(acknowledged as u64);
        }

        progress.finish_and_clear();
        Ok(upserted)
    }
}
