use crate::search::SearchError;
use crate::store::StoreError;
use crate::tests::support::engine;
use crate::verse::EmbeddingType;

#[test]
fn closest_verse_ranks_first() {
    let engine = engine();

    let verses = engine
        .search(
            "God's love for the world",
            EmbeddingType::Remote,
            None,
            false,
            None,
        )
        .unwrap();

    assert_eq!(verses.len(), 4);
    assert_eq!(verses[0].reference().as_deref(), Some("John 3:16"));
    assert_eq!(verses[1].reference().as_deref(), Some("1 John 4:8"));
}

#[test]
fn both_embedding_types_search_their_own_column() {
    let engine = engine();

    for embedding_type in [EmbeddingType::Remote, EmbeddingType::Local] {
        let verses = engine
            .search("my shepherd", embedding_type, Some("NIV"), false, Some(1))
            .unwrap();
        assert_eq!(verses.len(), 1);
        assert_eq!(verses[0].reference().as_deref(), Some("Psalms 23:1"));
    }
}

#[test]
fn only_text_hides_locations() {
    let verses = engine()
        .search("in the beginning", EmbeddingType::Local, None, true, Some(2))
        .unwrap();

    assert_eq!(verses.len(), 2);
    assert!(verses[0].text.starts_with("In the beginning"));
    assert!(verses
        .iter()
        .all(|v| v.book.is_none() && v.chapter.is_none() && v.verse.is_none()));
}

#[test]
fn k_larger_than_corpus_returns_everything() {
    let verses = engine()
        .search("love", EmbeddingType::Remote, None, false, Some(100))
        .unwrap();
    assert_eq!(verses.len(), 4);
}

#[test]
fn blank_query_matches_nothing() {
    let verses = engine()
        .search("   ", EmbeddingType::Remote, None, false, None)
        .unwrap();
    assert!(verses.is_empty());
}

#[test]
fn unknown_translation_is_a_bad_request() {
    let err = engine()
        .search("love", EmbeddingType::Remote, Some("KJV"), false, None)
        .unwrap_err();

    assert!(err.is_bad_request());
    assert!(matches!(
        err,
        SearchError::Store(StoreError::UnknownTranslation(name)) if name == "KJV"
    ));
}
