//! Verse and corpus table I/O.
//!
//! Cleaned verse files are CSV with a `book,chapter,verse,text` header.
//!
//! Corpus tables are zstd-compressed parquet files with the columns
//! `book, chapter, verse, text, remote_embedding, local_embedding`; the
//! embedding columns are fixed-size float lists. Every appended batch becomes
//! its own row group.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, FixedSizeListBuilder, Float32Array, Float32Builder,
    StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use super::CorpusError;
use crate::verse::{EmbeddingType, Verse, VerseEmbeddings};

const REMOTE_COLUMN: &str = "remote_embedding";
const LOCAL_COLUMN: &str = "local_embedding";

/// One row of a cleaned verse CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseRecord {
    pub book: u32,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
}

impl VerseRecord {
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.book, self.chapter, self.verse)
    }
}

impl From<VerseRecord> for Verse {
    fn from(record: VerseRecord) -> Self {
        Verse::new(record.book, record.chapter, record.verse, record.text)
    }
}

/// Iterates a cleaned verse CSV in file order, `batch_size` rows at a time.
/// The last batch may be short.
pub fn read_batches(
    path: &Path,
    batch_size: usize,
) -> Result<impl Iterator<Item = Result<Vec<VerseRecord>, CorpusError>>, CorpusError> {
    let reader = csv::Reader::from_path(path)?;
    let mut records = reader.into_deserialize::<VerseRecord>();
    let batch_size = batch_size.max(1);

    Ok(std::iter::from_fn(move || {
        let mut batch = Vec::with_capacity(batch_size);
        for record in records.by_ref() {
            match record {
                Ok(record) => batch.push(record),
                Err(err) => return Some(Err(err.into())),
            }
            if batch.len() == batch_size {
                break;
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }))
}

fn is_corpus_file(path: &Path) -> bool {
    path.extension().map(|ext| ext == "parquet").unwrap_or(false)
}

/// Arrow schema of a corpus table with the given vector sizes.
fn corpus_schema(remote: usize, local: usize) -> SchemaRef {
    let vector = |size: usize| {
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            size as i32,
        )
    };

    Arc::new(Schema::new(vec![
        Field::new("book", DataType::UInt32, false),
        Field::new("chapter", DataType::UInt32, false),
        Field::new("verse", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(REMOTE_COLUMN, vector(remote), false),
        Field::new(LOCAL_COLUMN, vector(local), false),
    ]))
}

/// Vector sizes recorded in a corpus schema.
fn schema_dimensions(schema: &Schema) -> Result<(usize, usize), CorpusError> {
    let size = |column: &'static str| match schema
        .field_with_name(column)
        .map(|field| field.data_type())
    {
        Ok(DataType::FixedSizeList(_, size)) => Ok(*size as usize),
        _ => Err(CorpusError::Schema(format!(
            "{column} is missing or not a fixed-size float list"
        ))),
    };

    Ok((size(REMOTE_COLUMN)?, size(LOCAL_COLUMN)?))
}

fn vector_column(
    rows: &[VerseEmbeddings],
    embedding_type: EmbeddingType,
    size: usize,
) -> FixedSizeListArray {
    let mut builder = FixedSizeListBuilder::with_capacity(
        Float32Builder::with_capacity(rows.len() * size),
        size as i32,
        rows.len(),
    );
    for row in rows {
        builder.values().append_slice(row.embedding(embedding_type));
        builder.append(true);
    }
    builder.finish()
}

fn to_record_batch(
    schema: SchemaRef,
    rows: &[VerseEmbeddings],
    (remote, local): (usize, usize),
) -> Result<RecordBatch, CorpusError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.book))),
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.chapter))),
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.verse))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.text.as_str()))),
        Arc::new(vector_column(rows, EmbeddingType::Remote, remote)),
        Arc::new(vector_column(rows, EmbeddingType::Local, local)),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn column<'b, T: 'static>(
    batch: &'b RecordBatch,
    name: &'static str,
) -> Result<&'b T, CorpusError> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<T>())
        .ok_or_else(|| CorpusError::Schema(format!("{name} column is missing or mistyped")))
}

fn vectors(batch: &RecordBatch, name: &'static str) -> Result<Vec<Vec<f32>>, CorpusError> {
    let lists = column::<FixedSizeListArray>(batch, name)?;
    let size = lists.value_length() as usize;
    let values = lists
        .values()
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| CorpusError::Schema(format!("{name} does not hold floats")))?
        .values();

    Ok((0..lists.len())
        .map(|i| {
            let start = lists.value_offset(i) as usize;
            values[start..start + size].to_vec()
        })
        .collect())
}

fn from_record_batch(batch: &RecordBatch) -> Result<Vec<VerseEmbeddings>, CorpusError> {
    let books = column::<UInt32Array>(batch, "book")?;
    let chapters = column::<UInt32Array>(batch, "chapter")?;
    let verses = column::<UInt32Array>(batch, "verse")?;
    let texts = column::<StringArray>(batch, "text")?;
    let remote = vectors(batch, REMOTE_COLUMN)?;
    let local = vectors(batch, LOCAL_COLUMN)?;

    Ok(remote
        .into_iter()
        .zip(local)
        .enumerate()
        .map(|(i, (remote_embedding, local_embedding))| VerseEmbeddings {
            book: books.value(i),
            chapter: chapters.value(i),
            verse: verses.value(i),
            text: texts.value(i).to_string(),
            remote_embedding,
            local_embedding,
        })
        .collect())
}

/// Ordered verses of one translation; row offset is the verse identity.
#[derive(Debug, Clone, Default)]
pub struct VerseTable {
    verses: Vec<Verse>,
}

impl VerseTable {
    #[cfg(test)]
    pub fn new(verses: Vec<Verse>) -> Self {
        Self { verses }
    }

    /// Load verses from a cleaned CSV or, for `.parquet` files, a corpus table.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        if is_corpus_file(path) {
            return Ok(CorpusTable::load(path)?.into());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let verses = reader
            .deserialize::<VerseRecord>()
            .map(|record| record.map(Verse::from))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { verses })
    }

    pub fn get(&self, offset: usize) -> Option<&Verse> {
        self.verses.get(offset)
    }

    pub fn len(&self) -> usize {
        self.verses.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Verse> {
        self.verses.iter()
    }
}

impl From<CorpusTable> for VerseTable {
    fn from(table: CorpusTable) -> Self {
        Self {
            verses: table.rows.iter().map(VerseEmbeddings::verse).collect(),
        }
    }
}

/// Verses with both embeddings, in corpus order.
#[derive(Debug, Clone, Default)]
pub struct CorpusTable {
    rows: Vec<VerseEmbeddings>,
}

impl CorpusTable {
    pub fn from_rows(rows: Vec<VerseEmbeddings>) -> Self {
        Self { rows }
    }

    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;

        let mut rows = vec![];
        for batch in reader {
            rows.extend(from_record_batch(&batch?)?);
        }

        log::info!("Loaded {} corpus rows from {}", rows.len(), path.display());
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[VerseEmbeddings] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Vector size of `embedding_type`, taken from the first row.
    pub fn dimensions(&self, embedding_type: EmbeddingType) -> Option<usize> {
        self.rows.first().map(|row| row.embedding(embedding_type).len())
    }
}

/// Appends encoded batches to a corpus table file.
///
/// Parquet files cannot grow in place, so the writer streams into a staging
/// file next to `path`: row groups already in `path` are copied over on
/// open, each appended batch adds one row group, and [`CorpusWriter::finish`]
/// renames the staging file over `path`. Until then `path` is untouched.
pub struct CorpusWriter {
    path: PathBuf,
    staging: PathBuf,
    dimensions: Option<(usize, usize)>,
    writer: Option<ArrowWriter<File>>,
}

impl CorpusWriter {
    /// Open `path` for appending. An existing file fixes the vector sizes
    /// every later batch must match.
    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        let mut writer = Self {
            path: path.to_path_buf(),
            staging: path.with_extension("parquet-tmp"),
            dimensions: None,
            writer: None,
        };
        if !path.exists() {
            return Ok(writer);
        }

        let existing = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let dimensions = schema_dimensions(existing.schema())?;
        let row_groups = existing.metadata().num_row_groups();

        let output = writer.writer.insert(create_writer(&writer.staging, dimensions)?);
        writer.dimensions = Some(dimensions);
        for row_group in 0..row_groups {
            let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?
                .with_row_groups(vec![row_group])
                .build()?;
            for batch in reader {
                output.write(&batch?)?;
            }
            output.flush()?;
        }
        log::debug!(
            "carried {row_groups} row groups over from {}",
            path.display()
        );

        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one batch as a new row group. Rows already in the file are not
    /// checked for duplicates.
    pub fn append(&mut self, rows: &[VerseEmbeddings]) -> Result<(), CorpusError> {
        let Some(first) = rows.first() else {
            return Ok(());
        };

        let (remote, local) = self
            .dimensions
            .unwrap_or((first.remote_embedding.len(), first.local_embedding.len()));
        for row in rows {
            check_column(REMOTE_COLUMN, remote, row.remote_embedding.len())?;
            check_column(LOCAL_COLUMN, local, row.local_embedding.len())?;
        }

        let batch = to_record_batch(corpus_schema(remote, local), rows, (remote, local))?;
        let writer = match &mut self.writer {
            Some(writer) => writer,
            slot => slot.insert(create_writer(&self.staging, (remote, local))?),
        };
        self.dimensions = Some((remote, local));
        writer.write(&batch)?;
        writer.flush()?;

        Ok(())
    }

    /// Write the parquet footer and move the table into place. Returns the
    /// number of rows in the finished table.
    pub fn finish(self) -> Result<usize, CorpusError> {
        let Some(writer) = self.writer else {
            return Ok(0);
        };

        let metadata = writer.close()?;
        std::fs::rename(&self.staging, &self.path)?;
        Ok(metadata.num_rows as usize)
    }
}

fn create_writer(
    staging: &Path,
    (remote, local): (usize, usize),
) -> Result<ArrowWriter<File>, CorpusError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    Ok(ArrowWriter::try_new(
        File::create(staging)?,
        corpus_schema(remote, local),
        Some(props),
    )?)
}

fn check_column(column: &'static str, expected: usize, got: usize) -> Result<(), CorpusError> {
    if expected != got {
        return Err(CorpusError::DimensionMismatch {
            column,
            expected,
            got,
        });
    }
    Ok(())
}
