//! Recorded tails: JSON-lines files of tail records.

use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use tailfeed_engine::{CursorSource, TailError, TailResult};
use tailfeed_protocol::RawChangeRow;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reading a recording.
#[derive(Error, Debug)]
pub enum RecordingError {
    /// The file could not be read.
    #[error("cannot read recording: {0}")]
    Io(#[from] std::io::Error),

    /// Every line of the recording was malformed.
    #[error("recording has no valid rows ({skipped} malformed lines)")]
    Empty {
        /// Lines skipped.
        skipped: usize,
    },
}

/// Rows parsed from a recording.
#[derive(Debug, Default)]
pub struct Recording {
    /// Rows in file order.
    pub rows: Vec<RawChangeRow>,
    /// Lines that were not valid tail records.
    pub skipped: usize,
}

impl Recording {
    /// Reads a recording. Blank lines are ignored; malformed lines are
    /// logged and skipped.
    pub fn read(path: &Path) -> Result<Self, RecordingError> {
        let reader = BufReader::new(File::open(path)?);
        let mut recording = Recording::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(row) => recording.rows.push(row),
                Err(message) => {
                    warn!(line = index + 1, error = %message, "skipping malformed record");
                    recording.skipped += 1;
                }
            }
        }

        if recording.rows.is_empty() && recording.skipped > 0 {
            return Err(RecordingError::Empty {
                skipped: recording.skipped,
            });
        }
        debug!(rows = recording.rows.len(), skipped = recording.skipped, "recording read");
        Ok(recording)
    }
}

fn parse_line(line: &str) -> Result<RawChangeRow, String> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(record)) => {
            RawChangeRow::from_tail_record(&record).map_err(|e| e.to_string())
        }
        Ok(_) => Err("record is not a JSON object".into()),
        Err(e) => Err(e.to_string()),
    }
}

/// A cursor source replaying recorded rows.
///
/// The source ends once every row has been fetched.
#[derive(Debug)]
pub struct RecordingSource {
    rows: VecDeque<RawChangeRow>,
    declared: bool,
}

impl RecordingSource {
    /// Creates a source over `rows`.
    pub fn new(rows: Vec<RawChangeRow>) -> Self {
        Self {
            rows: rows.into(),
            declared: false,
        }
    }
}

impl CursorSource for RecordingSource {
    fn declare(&mut self, cursor: &str, statement: &str) -> TailResult<()> {
        debug!(cursor, statement, "replaying recording");
        self.declared = true;
        Ok(())
    }

    fn fetch(
        &mut self,
        cursor: &str,
        count: usize,
        _timeout: Duration,
    ) -> TailResult<Vec<RawChangeRow>> {
        if !self.declared {
            return Err(TailError::fetch_fatal(format!(
                "cursor {cursor:?} does not exist"
            )));
        }
        let take = count.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    fn close(&mut self, _cursor: &str) -> TailResult<()> {
        self.declared = false;
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.rows.is_empty()
    }
}
