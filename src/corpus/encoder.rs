//! Corpus encoding job: cleaned verse CSV -> corpus table.
//!
//! Each batch is embedded by both backends before anything is written; a
//! failing batch aborts the job, and the batches before it are still
//! committed to the output table.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use super::{read_batches, CorpusError, CorpusWriter, VerseRecord};
use crate::embedding::{EmbeddingError, Embedders};
use crate::verse::{EmbeddingType, VerseEmbeddings};

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub batch_size: usize,
    /// Batches already present in the output (from an earlier, failed run).
    pub skip_batches: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodeReport {
    pub batches: usize,
    pub rows: usize,
    pub skipped_batches: usize,
}

pub struct CorpusEncoder<'a> {
    embedders: &'a Embedders,
}

impl<'a> CorpusEncoder<'a> {
    pub fn new(embedders: &'a Embedders) -> Self {
        Self { embedders }
    }

    /// Embed one batch with both backends. All-or-nothing.
    pub fn encode_batch(
        &self,
        batch: &[VerseRecord],
    ) -> Result<Vec<VerseEmbeddings>, EmbeddingError> {
        let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();

        let remote = self.embedders.get(EmbeddingType::Remote).embed_many(&texts)?;
        let local = self.embedders.get(EmbeddingType::Local).embed_many(&texts)?;

        if remote.len() != batch.len() || local.len() != batch.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "batch of {} verses produced {} remote and {} local embeddings",
                batch.len(),
                remote.len(),
                local.len()
            )));
        }

        Ok(batch
            .iter()
            .zip(remote)
            .zip(local)
            .map(|((record, remote_embedding), local_embedding)| VerseEmbeddings {
                book: record.book,
                chapter: record.chapter,
                verse: record.verse,
                text: record.text.clone(),
                remote_embedding,
                local_embedding,
            })
            .collect())
    }

    /// Encode `csv_path` batch by batch, appending each finished batch to
    /// `output`.
    pub fn encode_file(
        &self,
        csv_path: &Path,
        output: &Path,
        opts: &EncodeOptions,
    ) -> Result<EncodeReport, CorpusError> {
        let mut writer = CorpusWriter::open(output)?;
        let mut report = EncodeReport::default();

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner} {pos} verses encoded ({elapsed}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let result = self.encode_batches(csv_path, &mut writer, opts, &progress, &mut report);
        progress.finish_and_clear();

        // batches finished before a failure are kept
        let total = writer.finish()?;
        result?;

        log::info!(
            "Encoded {} verses in {} batches into {} ({} batches skipped, {total} rows in table)",
            report.rows,
            report.batches,
            output.display(),
            report.skipped_batches
        );

        Ok(report)
    }

    fn encode_batches(
        &self,
        csv_path: &Path,
        writer: &mut CorpusWriter,
        opts: &EncodeOptions,
        progress: &ProgressBar,
        report: &mut EncodeReport,
    ) -> Result<(), CorpusError> {
        for (index, batch) in read_batches(csv_path, opts.batch_size)?.enumerate() {
            let batch = batch?;

            if index < opts.skip_batches {
                report.skipped_batches += 1;
                continue;
            }

            let encoded = self.encode_batch(&batch).map_err(|source| {
                log::error!("Problematic batch {index}: {batch:?}");
                batch_error(index, &batch, source)
            })?;

            writer.append(&encoded)?;

            report.batches += 1;
            report.rows += encoded.len();
            progress.inc(encoded.len() as u64);
            log::debug!(
                "batch {index}: {} verses written to {}",
                encoded.len(),
                writer.path().display()
            );
        }

        Ok(())
    }
}

fn batch_error(index: usize, batch: &[VerseRecord], source: EmbeddingError) -> CorpusError {
    let location = |r: Option<&VerseRecord>| r.map(VerseRecord::location).unwrap_or_default();

    CorpusError::Batch {
        index,
        first: location(batch.first()),
        last: location(batch.last()),
        size: batch.len(),
        source,
    }
}
