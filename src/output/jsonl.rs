//! JSON Lines output writer

use crate::Record;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::{ensure_parent_dir, OutputError, OutputResult, RecordWriter, FLUSH_INTERVAL};

/// Writes one JSON object per record per line
pub struct JsonLinesWriter {
    writer: BufWriter<File>,
    records_written: u64,
}

impl JsonLinesWriter {
    /// Create a new JSON Lines writer
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating JSON Lines writer: path={}", path.display());

        ensure_parent_dir(path)?;
        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))?;

        Ok(Self {
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    /// Append to an existing file, creating it if missing
    pub fn append<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Appending to JSON Lines file: path={}", path.display());

        ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {e}")))?;

        Ok(Self {
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }
}

impl RecordWriter for JsonLinesWriter {
    fn write_record(&mut self, record: &Record) -> OutputResult<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| OutputError::IoError(e.to_string()))?;

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
        let file = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;

        info!("JSON Lines writer closed: {} records written", self.records_written);
        Ok(self.records_written)
    }
}
