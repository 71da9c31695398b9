//! Store backed by the managed index; only verse text lives locally.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;

use super::{project, StoreError, StoreQuery, VectorStore};
use crate::config::{Config, IdScheme};
use crate::corpus::VerseTable;
use crate::index::{IdResolver, IndexService};
use crate::verse::{EmbeddingType, Verse};

struct Translation {
    verses: VerseTable,
    ids: IdResolver,
}

pub struct RemoteIndexStore {
    service: Arc<dyn IndexService>,
    indexes: BTreeMap<String, EmbeddingType>,
    translations: BTreeMap<String, Translation>,
}

impl RemoteIndexStore {
    pub fn new(
        service: Arc<dyn IndexService>,
        indexes: BTreeMap<String, EmbeddingType>,
        tables: BTreeMap<String, VerseTable>,
        id_scheme: IdScheme,
    ) -> Self {
        let translations = tables
            .into_iter()
            .map(|(name, verses)| {
                let ids = IdResolver::new(id_scheme, verses.iter());
                (name, Translation { verses, ids })
            })
            .collect();

        Self {
            service,
            indexes,
            translations,
        }
    }

    /// Load the verse table of every configured translation.
    pub fn load(config: &Config, service: Arc<dyn IndexService>) -> anyhow::Result<Self> {
        let mut tables = BTreeMap::new();
        for name in config.translations.keys() {
            let path = config
                .translation_path(name)
                .with_context(|| format!("translation {name} has no verse file"))?;
            let table = VerseTable::load(&path)
                .with_context(|| format!("failed to load {name} from {}", path.display()))?;
            log::info!("Loaded {} {name} verses", table.len());
            tables.insert(name.clone(), table);
        }

        Ok(Self::new(
            service,
            config.index.indexes.clone(),
            tables,
            config.index.id_scheme,
        ))
    }

    fn index_for(&self, embedding_type: EmbeddingType) -> Option<&str> {
        self.indexes
            .iter()
            .find(|(_, t)| **t == embedding_type)
            .map(|(name, _)| name.as_str())
    }
}

impl VectorStore for RemoteIndexStore {
    fn query(&self, query: &StoreQuery<'_>) -> Result<Vec<Verse>, StoreError> {
        let translation = self
            .translations
            .get(query.translation)
            .ok_or_else(|| StoreError::UnknownTranslation(query.translation.to_string()))?;
        let index = self
            .index_for(query.embedding_type)
            .ok_or(StoreError::NoIndexFor(query.embedding_type))?;

        let matches = self
            .service
            .query(index, query.translation, query.vector, query.k)?;

        matches
            .into_iter()
            .map(|m| {
                translation
                    .ids
                    .resolve(&m.id)
                    .and_then(|offset| translation.verses.get(offset))
                    .map(|verse| project(verse, query.only_text))
                    .ok_or(StoreError::UnresolvedId(m.id))
            })
            .collect()
    }

    fn translations(&self) -> Vec<String> {
        self.translations.keys().cloned().collect()
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::index::{IndexError, IndexSpec, Match, VectorRecord};

    /// Answers every query with a fixed list of matches.
    struct CannedIndex {
        matches: Result<Vec<Match>, u16>,
        queries: Mutex<Vec<(String, String, usize)>>,
    }

    impl CannedIndex {
        fn new(matches: Result<Vec<Match>, u16>) -> Arc<Self> {
            Arc::new(Self {
                matches,
                queries: Mutex::new(vec![]),
            })
        }
    }

    impl IndexService for CannedIndex {
        fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
            Ok(vec![])
        }

        fn create_index(&self, _spec: &IndexSpec) -> Result<(), IndexError> {
            Ok(())
        }

        fn index_ready(&self, _name: &str) -> Result<bool, IndexError> {
            Ok(true)
        }

        fn delete_index(&self, _name: &str) -> Result<(), IndexError> {
            Ok(())
        }

        fn upsert(&self, _: &str, _: &str, vectors: &[VectorRecord]) -> Result<usize, IndexError> {
            Ok(vectors.len())
        }

        fn query(
            &self,
            index: &str,
            namespace: &str,
            _vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<Match>, IndexError> {
            self.queries
                .lock()
                .unwrap()
                .push((index.to_string(), namespace.to_string(), top_k));
            self.matches.clone().map_err(|status| IndexError::Api {
                status,
                message: "unavailable".to_string(),
            })
        }
    }

    fn hit(id: &str, score: f32) -> Match {
        Match {
            id: id.to_string(),
            score,
        }
    }

    fn store(service: Arc<CannedIndex>) -> RemoteIndexStore {
        let verses = VerseTable::new(vec![
            Verse::new(1, 1, 1, "In the beginning"),
            Verse::new(43, 3, 16, "For God so loved the world"),
        ]);
        RemoteIndexStore::new(
            service,
            BTreeMap::from([("ada".to_string(), EmbeddingType::Remote)]),
            BTreeMap::from([("NIV".to_string(), verses)]),
            IdScheme::Offset,
        )
    }

    fn query(embedding_type: EmbeddingType) -> StoreQuery<'static> {
        StoreQuery {
            vector: &[0.1, 0.2],
            embedding_type,
            translation: "NIV",
            k: 5,
            only_text: false,
        }
    }

    #[test]
    fn matches_resolve_in_rank_order() {
        let service = CannedIndex::new(Ok(vec![hit("1", 0.9), hit("0", 0.4)]));
        let verses = store(service.clone())
            .query(&query(EmbeddingType::Remote))
            .unwrap();

        assert_eq!(verses[0].book, Some(43));
        assert_eq!(verses[1].book, Some(1));
        assert_eq!(
            service.queries.lock().unwrap()[0],
            ("ada".to_string(), "NIV".to_string(), 5)
        );
    }

    #[test]
    fn no_matches_is_empty_not_an_error() {
        let verses = store(CannedIndex::new(Ok(vec![])))
            .query(&query(EmbeddingType::Remote))
            .unwrap();
        assert!(verses.is_empty());
    }

    #[test]
    fn service_failure_propagates() {
        let err = store(CannedIndex::new(Err(503)))
            .query(&query(EmbeddingType::Remote))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Index(IndexError::Api { status: 503, .. })
        ));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let err = store(CannedIndex::new(Ok(vec![hit("7", 0.9)])))
            .query(&query(EmbeddingType::Remote))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnresolvedId(id) if id == "7"));
    }

    #[test]
    fn embedding_without_index_is_refused() {
        let err = store(CannedIndex::new(Ok(vec![])))
            .query(&query(EmbeddingType::Local))
            .unwrap_err();
        assert!(matches!(err, StoreError::NoIndexFor(EmbeddingType::Local)));
    }

    #[test]
    fn only_text_drops_locations() {
        let verses = store(CannedIndex::new(Ok(vec![hit("1", 0.9)])))
            .query(&StoreQuery {
                only_text: true,
                ..query(EmbeddingType::Remote)
            })
            .unwrap();
        assert_eq!(verses[0], Verse::new(43, 3, 16, "For God so loved the world").text_only());
    }
}
