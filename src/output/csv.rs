//! CSV output writer

use crate::Record;
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

use super::{ensure_parent_dir, OutputError, OutputResult, RecordWriter, FLUSH_INTERVAL};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// CSV row for a view record; `value` and `doc` are embedded as JSON text
#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    id: &'a str,
    key: &'a str,
    value: String,
    doc: String,
}

impl<'a> RecordRow<'a> {
    fn from_record(record: &'a Record) -> OutputResult<Self> {
        let encode = |value: &serde_json::Value| {
            serde_json::to_string(value).map_err(|e| OutputError::SerializationError(e.to_string()))
        };
        Ok(Self {
            id: &record.id,
            key: &record.key,
            value: encode(&record.value)?,
            doc: match &record.doc {
                Some(doc) => encode(doc)?,
                None => String::new(),
            },
        })
    }
}

/// CSV writer with columns `id,key,value,doc`
pub struct CsvRecordWriter {
    writer: Writer<BufWriter<File>>,
    records_written: u64,
}

impl CsvRecordWriter {
    /// Create a new CSV writer with the default buffer size
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        Self::new_with_buffer_size(path, DEFAULT_BUFFER_SIZE)
    }

    /// Create a new CSV writer with a custom buffer size
    pub fn new_with_buffer_size<P: AsRef<Path>>(path: P, buffer_size: usize) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating CSV writer: path={}", path.display());

        ensure_parent_dir(path)?;
        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))?;

        // Header row is emitted by the first serialize()
        let writer = Writer::from_writer(BufWriter::with_capacity(buffer_size, file));

        Ok(Self {
            writer,
            records_written: 0,
        })
    }

    /// Append to an existing CSV file; the header is written only if the file is empty
    pub fn append<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Appending to CSV file: path={}", path.display());

        ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {e}")))?;
        let existing = file
            .metadata()
            .map_err(|e| OutputError::IoError(format!("Failed to read metadata: {e}")))?
            .len();

        let writer = WriterBuilder::new()
            .has_headers(existing == 0)
            .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));

        Ok(Self {
            writer,
            records_written: 0,
        })
    }
}

impl RecordWriter for CsvRecordWriter {
    fn write_record(&mut self, record: &Record) -> OutputResult<()> {
        let row = RecordRow::from_record(record)?;
        self.writer
            .serialize(&row)
            .map_err(|e| OutputError::CsvError(format!("Failed to write record: {e}")))?;

        self.records_written += 1;
        if self.records_written % FLUSH_INTERVAL == 0 {
            self.flush()?;
            debug!("Progress: {} records written", self.records_written);
        }
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn close(mut self) -> OutputResult<u64> {
        self.flush()?;

        let buf_writer = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;
        let file = buf_writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;

        info!("CSV writer closed: {} records written", self.records_written);
        Ok(self.records_written)
    }
}
