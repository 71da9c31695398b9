use std::path::Path;

use super::{CorpusError, VerseRecord};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub kept: usize,
    pub dropped: usize,
}

/// Rewrite a raw, headerless `book,chapter,verse,text` file in place as a
/// cleaned CSV with a header. Rows with a missing or unparseable field are
/// dropped.
pub fn clean(path: &Path) -> Result<CleanReport, CorpusError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .escape(Some(b'\\'))
        .from_path(path)?;

    let mut report = CleanReport::default();
    let mut records = vec![];
    for record in reader.records() {
        match parse_record(&record?) {
            Some(verse) => {
                report.kept += 1;
                records.push(verse);
            }
            None => report.dropped += 1,
        }
    }

    let temp_path = path.with_extension("csv-tmp");
    let mut writer = csv::Writer::from_path(&temp_path)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    drop(writer);
    std::fs::rename(&temp_path, path)?;

    log::info!(
        "Cleaned {}: kept {} rows, dropped {}",
        path.display(),
        report.kept,
        report.dropped
    );

    Ok(report)
}

fn parse_record(record: &csv::StringRecord) -> Option<VerseRecord> {
    let field = |idx: usize| record.get(idx).map(str::trim).filter(|f| !f.is_empty());

    Some(VerseRecord {
        book: field(0)?.parse().ok()?,
        chapter: field(1)?.parse().ok()?,
        verse: field(2)?.parse().ok()?,
        text: field(3)?.to_string(),
    })
}
