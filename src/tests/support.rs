//! Fakes shared by the cross-module tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::corpus::CorpusTable;
use crate::embedding::{
    EmbeddingApi, EmbeddingError, EmbeddingProvider, Embedders, RemoteEmbedder, RetryPolicy,
};
use crate::index::{IndexError, IndexService, IndexSpec, Match, VectorRecord};
use crate::search::SearchEngine;
use crate::store::MemoryStore;
use crate::verse::VerseEmbeddings;

const VOCABULARY: [&str; 6] = ["god", "love", "world", "beginning", "lord", "shepherd"];

/// Bag-of-words embedder over a tiny vocabulary. A word counts toward a
/// vocabulary entry when it starts with it, so "loved" hits "love".
pub struct VocabularyEmbedder;

impl VocabularyEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; VOCABULARY.len()];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            if let Some(idx) = VOCABULARY.iter().position(|v| word.starts_with(v)) {
                vector[idx] += 1.0;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl EmbeddingProvider for VocabularyEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::vector(text))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        VOCABULARY.len()
    }

    fn name(&self) -> &str {
        "vocabulary"
    }
}

pub fn vocabulary_embedders() -> Embedders {
    Embedders::new(Arc::new(VocabularyEmbedder), Arc::new(VocabularyEmbedder))
}

pub const VERSES: [(u32, u32, u32, &str); 4] = [
    (1, 1, 1, "In the beginning God created the heavens and the earth."),
    (19, 23, 1, "The LORD is my shepherd, I lack nothing."),
    (
        43,
        3,
        16,
        "For God so loved the world that he gave his one and only Son",
    ),
    (62, 4, 8, "Whoever does not love does not know God, because God is love."),
];

pub fn corpus() -> CorpusTable {
    CorpusTable::from_rows(
        VERSES
            .iter()
            .map(|(book, chapter, verse, text)| VerseEmbeddings {
                book: *book,
                chapter: *chapter,
                verse: *verse,
                text: text.to_string(),
                remote_embedding: VocabularyEmbedder::vector(text),
                local_embedding: VocabularyEmbedder::vector(text),
            })
            .collect(),
    )
}

pub fn engine() -> SearchEngine {
    let store = MemoryStore::new(BTreeMap::from([("NIV".to_string(), corpus())])).unwrap();
    SearchEngine::new(vocabulary_embedders(), Box::new(store), "NIV", 10)
}

/// Embedding endpoint that fails or succeeds per call according to a script.
/// Calls past the end of the script succeed.
pub struct ScriptedApi {
    script: Mutex<VecDeque<bool>>,
    pub calls: Arc<Mutex<u32>>,
}

impl ScriptedApi {
    /// `true` entries succeed, `false` entries fail with a 503.
    pub fn new(script: &[bool]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl EmbeddingApi for ScriptedApi {
    fn create(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        *self.calls.lock().unwrap() += 1;
        if !self.script.lock().unwrap().pop_front().unwrap_or(true) {
            return Err(EmbeddingError::Transient("503 Service Unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32, 0.0, 1.0]).collect())
    }
}

pub type Sleeps = Arc<Mutex<Vec<Duration>>>;

/// Remote embedder over a [`ScriptedApi`] that records its backoff instead
/// of sleeping.
pub fn scripted_embedders(script: &[bool]) -> (Embedders, Sleeps, Arc<Mutex<u32>>) {
    let api = ScriptedApi::new(script);
    let calls = api.calls.clone();
    let sleeps: Sleeps = Arc::new(Mutex::new(vec![]));

    let recorded = sleeps.clone();
    let remote = RemoteEmbedder::new(Box::new(api), "scripted", 3, RetryPolicy::default())
        .with_sleep(move |delay| recorded.lock().unwrap().push(delay));

    let embedders = Embedders::new(Arc::new(remote), Arc::new(VocabularyEmbedder));
    (embedders, sleeps, calls)
}

/// In-memory index service that logs every call.
///
/// Like the real service, creation and deletion settle asynchronously: a new
/// index answers `index_ready` with `false` for `not_ready_polls` calls, and
/// a deleted one stays listed for `lingering_lists` calls.
#[derive(Default)]
pub struct RecordingIndex {
    pub existing: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    pub vectors: Mutex<BTreeMap<(String, String), Vec<VectorRecord>>>,
    /// Fail the upsert with this 1-based call number.
    pub fail_upsert: Option<usize>,
    pub not_ready_polls: usize,
    pub lingering_lists: usize,
    /// Acknowledge one vector fewer than each upsert carried.
    pub under_acknowledge: bool,
    pub pending_ready: Mutex<BTreeMap<String, usize>>,
    pub deleting: Mutex<BTreeMap<String, usize>>,
}

impl RecordingIndex {
    pub fn with_existing(names: &[&str]) -> Self {
        Self {
            existing: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stored(&self, index: &str, namespace: &str) -> usize {
        self.vectors
            .lock()
            .unwrap()
            .get(&(index.to_string(), namespace.to_string()))
            .map_or(0, Vec::len)
    }

    fn upserts(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("upsert")).count()
    }

    fn conflict(message: String) -> IndexError {
        IndexError::Api {
            status: 409,
            message,
        }
    }
}

impl IndexService for RecordingIndex {
    fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        self.calls.lock().unwrap().push("list".to_string());

        let mut names = self.existing.lock().unwrap().clone();
        let mut deleting = self.deleting.lock().unwrap();
        for (name, remaining) in deleting.iter_mut() {
            names.push(name.clone());
            *remaining -= 1;
        }
        deleting.retain(|_, remaining| *remaining > 0);
        Ok(names)
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        self.calls.lock().unwrap().push(format!(
            "create {} {} {}",
            spec.name, spec.dimension, spec.metric
        ));
        if self.deleting.lock().unwrap().contains_key(&spec.name) {
            return Err(Self::conflict(format!("{} is being deleted", spec.name)));
        }
        if self.existing.lock().unwrap().contains(&spec.name) {
            return Err(Self::conflict(format!("{} already exists", spec.name)));
        }

        self.existing.lock().unwrap().push(spec.name.clone());
        self.pending_ready
            .lock()
            .unwrap()
            .insert(spec.name.clone(), self.not_ready_polls);
        Ok(())
    }

    fn index_ready(&self, name: &str) -> Result<bool, IndexError> {
        self.calls.lock().unwrap().push(format!("ready {name}"));

        let mut pending = self.pending_ready.lock().unwrap();
        match pending.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(false)
            }
            _ => Ok(self.existing.lock().unwrap().iter().any(|n| n == name)),
        }
    }

    fn delete_index(&self, name: &str) -> Result<(), IndexError> {
        self.calls.lock().unwrap().push(format!("delete {name}"));
        self.existing.lock().unwrap().retain(|n| n != name);
        self.vectors.lock().unwrap().retain(|(index, _), _| index != name);
        if self.lingering_lists > 0 {
            self.deleting
                .lock()
                .unwrap()
                .insert(name.to_string(), self.lingering_lists);
        }
        Ok(())
    }

    fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[VectorRecord],
    ) -> Result<usize, IndexError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("upsert {index} {namespace} {}", vectors.len()));
        if self.fail_upsert == Some(self.upserts()) {
            return Err(IndexError::Api {
                status: 500,
                message: "upsert failed".to_string(),
            });
        }
        let not_ready = self
            .pending_ready
            .lock()
            .unwrap()
            .get(index)
            .is_some_and(|remaining| *remaining > 0);
        if not_ready || !self.existing.lock().unwrap().iter().any(|n| n == index) {
            return Err(IndexError::NotReady(index.to_string()));
        }

        self.vectors
            .lock()
            .unwrap()
            .entry((index.to_string(), namespace.to_string()))
            .or_default()
            .extend_from_slice(vectors);
        Ok(vectors.len() - usize::from(self.under_acknowledge))
    }

    fn query(
        &self,
        index: &str,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        let vectors = self.vectors.lock().unwrap();
        let Some(stored) = vectors.get(&(index.to_string(), namespace.to_string())) else {
            return Ok(vec![]);
        };

        let mut matches: Vec<Match> = stored
            .iter()
            .map(|record| Match {
                id: record.id.clone(),
                score: record.values.iter().zip(vector).map(|(a, b)| a * b).sum(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}
