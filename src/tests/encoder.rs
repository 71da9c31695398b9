use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::corpus::{CorpusEncoder, CorpusError, CorpusTable, EncodeOptions, VerseRecord};
use crate::embedding::{EmbeddingError, RetryPolicy};
use crate::tests::support::{scripted_embedders, VERSES};

fn write_verses(dir: &Path) -> PathBuf {
    let path = dir.join("NIV_clean.csv");
    let mut writer = csv::Writer::from_path(&path).unwrap();
    for (book, chapter, verse, text) in VERSES {
        writer
            .serialize(VerseRecord {
                book,
                chapter,
                verse,
                text: text.to_string(),
            })
            .unwrap();
    }
    writer.flush().unwrap();
    path
}

fn options(batch_size: usize) -> EncodeOptions {
    EncodeOptions {
        batch_size,
        skip_batches: 0,
    }
}

#[test]
fn encodes_every_verse_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_path = write_verses(tmp.path());
    let output = tmp.path().join("NIV.parquet");

    let (embedders, sleeps, _) = scripted_embedders(&[]);
    let report = CorpusEncoder::new(&embedders)
        .encode_file(&csv_path, &output, &options(3))
        .unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(report.rows, VERSES.len());
    assert!(sleeps.lock().unwrap().is_empty());

    let table = CorpusTable::load(&output).unwrap();
    let locations: Vec<(u32, u32, u32)> = table
        .rows()
        .iter()
        .map(|r| (r.book, r.chapter, r.verse))
        .collect();
    let expected: Vec<(u32, u32, u32)> = VERSES.iter().map(|v| (v.0, v.1, v.2)).collect();
    assert_eq!(locations, expected);
    assert_eq!(table.dimensions(crate::verse::EmbeddingType::Remote), Some(3));
    assert_eq!(table.dimensions(crate::verse::EmbeddingType::Local), Some(6));
}

#[test]
fn transient_failures_are_retried_within_bounds() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_path = write_verses(tmp.path());
    let output = tmp.path().join("NIV.parquet");

    // three 503s, then success
    let (embedders, sleeps, calls) = scripted_embedders(&[false, false, false, true]);
    let report = CorpusEncoder::new(&embedders)
        .encode_file(&csv_path, &output, &options(50))
        .unwrap();

    assert_eq!(report.rows, VERSES.len());
    assert_eq!(*calls.lock().unwrap(), 4);

    let sleeps = sleeps.lock().unwrap().clone();
    assert_eq!(
        sleeps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    let total: Duration = sleeps.iter().sum();
    assert!(total <= RetryPolicy::default().max_total_wait());
}

#[test]
fn exhausted_retries_name_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_path = write_verses(tmp.path());
    let output = tmp.path().join("NIV.parquet");

    // first batch goes through, the second never does
    let (embedders, _, calls) = scripted_embedders(&[true, false, false, false, false]);
    let err = CorpusEncoder::new(&embedders)
        .encode_file(&csv_path, &output, &options(2))
        .unwrap_err();

    match err {
        CorpusError::Batch {
            index,
            first,
            last,
            size,
            source,
        } => {
            assert_eq!(index, 1);
            assert_eq!(first, "43:3:16");
            assert_eq!(last, "62:4:8");
            assert_eq!(size, 2);
            assert!(matches!(
                source,
                EmbeddingError::RetriesExhausted { attempts: 4, .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*calls.lock().unwrap(), 5);

    // the batch written before the failure is kept
    let table = CorpusTable::load(&output).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows()[1].verse, 1);
}

#[test]
fn skipped_batches_resume_an_interrupted_run() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_path = write_verses(tmp.path());
    let output = tmp.path().join("NIV.parquet");

    let (embedders, _, _) = scripted_embedders(&[true, false, false, false, false]);
    assert!(CorpusEncoder::new(&embedders)
        .encode_file(&csv_path, &output, &options(2))
        .is_err());

    let (embedders, _, _) = scripted_embedders(&[]);
    let report = CorpusEncoder::new(&embedders)
        .encode_file(
            &csv_path,
            &output,
            &EncodeOptions {
                batch_size: 2,
                skip_batches: 1,
            },
        )
        .unwrap();

    assert_eq!(report.skipped_batches, 1);
    assert_eq!(report.rows, 2);

    let table = CorpusTable::load(&output).unwrap();
    let books: Vec<u32> = table.rows().iter().map(|r| r.book).collect();
    assert_eq!(books, vec![1, 19, 43, 62]);
}
