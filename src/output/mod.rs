//! Record output writers
//!
//! Writers receive each page as soon as the aggregator accepts it. They are
//! plain `&mut self` writers; [`SharedWriter`] puts one behind a mutex so it
//! can serve as the harvest's [`RecordProcessor`].

use crate::harvest::aggregator::{ProcessError, RecordProcessor};
use crate::Record;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

pub mod csv;
pub mod jsonl;

pub use self::csv::CsvRecordWriter;
pub use self::jsonl::JsonLinesWriter;

/// Flush interval for output writers (flush every N records)
pub const FLUSH_INTERVAL: u64 = 1_000;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Writer was already closed
    #[error("writer closed")]
    Closed,
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Writes view records to a destination
pub trait RecordWriter: Send {
    /// Write a single record
    fn write_record(&mut self, record: &Record) -> OutputResult<()>;

    /// Write a page of records
    fn write_records(&mut self, records: &[Record]) -> OutputResult<()> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Flush any buffered data
    fn flush(&mut self) -> OutputResult<()>;

    /// Records written so far
    fn records_written(&self) -> u64;

    /// Flush, sync and close; returns the number of records written
    fn close(self) -> OutputResult<u64>
    where
        Self: Sized;
}

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Comma-separated values, `id,key,value,doc`
    #[default]
    Csv,
    /// One JSON object per line
    JsonLines,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" | "ndjson" => Ok(OutputFormat::JsonLines),
            _ => Err(format!("Invalid output format: {s}. Valid options: csv, jsonl")),
        }
    }
}

/// A file writer in one of the supported formats
pub enum FileWriter {
    /// CSV output
    Csv(CsvRecordWriter),
    /// JSON Lines output
    JsonLines(JsonLinesWriter),
}

impl FileWriter {
    /// Create `path` in `format`
    pub fn create<P: AsRef<Path>>(path: P, format: OutputFormat) -> OutputResult<Self> {
        Ok(match format {
            OutputFormat::Csv => FileWriter::Csv(CsvRecordWriter::new(path)?),
            OutputFormat::JsonLines => FileWriter::JsonLines(JsonLinesWriter::new(path)?),
        })
    }

    /// Open `path` for appending in `format`
    pub fn append<P: AsRef<Path>>(path: P, format: OutputFormat) -> OutputResult<Self> {
        Ok(match format {
            OutputFormat::Csv => FileWriter::Csv(CsvRecordWriter::append(path)?),
            OutputFormat::JsonLines => FileWriter::JsonLines(JsonLinesWriter::append(path)?),
        })
    }
}

impl RecordWriter for FileWriter {
    fn write_record(&mut self, record: &Record) -> OutputResult<()> {
        match self {
            FileWriter::Csv(w) => w.write_record(record),
            FileWriter::JsonLines(w) => w.write_record(record),
        }
    }

    fn flush(&mut self) -> OutputResult<()> {
        match self {
            FileWriter::Csv(w) => w.flush(),
            FileWriter::JsonLines(w) => w.flush(),
        }
    }

    fn records_written(&self) -> u64 {
        match self {
            FileWriter::Csv(w) => w.records_written(),
            FileWriter::JsonLines(w) => w.records_written(),
        }
    }

    fn close(self) -> OutputResult<u64> {
        match self {
            FileWriter::Csv(w) => w.close(),
            FileWriter::JsonLines(w) => w.close(),
        }
    }
}

/// A writer shared by all harvest workers
pub struct SharedWriter<W: RecordWriter> {
    inner: Mutex<Option<W>>,
}

impl<W: RecordWriter> SharedWriter<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Some(writer)),
        }
    }

    /// Close the inner writer; later pages are rejected
    pub fn close(&self) -> OutputResult<u64> {
        let writer = self
            .inner
            .lock()
            .map_err(|_| OutputError::IoError("writer lock poisoned".to_string()))?
            .take()
            .ok_or(OutputError::Closed)?;
        writer.close()
    }
}

impl<W: RecordWriter> RecordProcessor for SharedWriter<W> {
    fn process(&self, records: &[Record]) -> Result<(), ProcessError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ProcessError::Rejected("writer lock poisoned".to_string()))?;
        let writer = guard.as_mut().ok_or(OutputError::Closed)?;
        writer.write_records(records)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), ProcessError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ProcessError::Rejected("writer lock poisoned".to_string()))?;
        if let Some(writer) = guard.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Create the parent directory of `path` if it has one
pub(crate) fn ensure_parent_dir(path: &Path) -> OutputResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        }
    }
    Ok(())
}
