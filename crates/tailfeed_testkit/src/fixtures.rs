//! Test fixtures: antenna rows and recorded tails.
//!
//! Provides convenience functions for building change rows the way the
//! tailed view emits them, and for writing JSON-lines recordings.

use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tailfeed_protocol::{AntennaRecord, GeoFeature, RawChangeRow};
use tempfile::TempDir;

/// Returns the point feature used for antenna `id`.
///
/// Positions are spread over a small grid so that every id gets a
/// distinct, stable location.
pub fn feature(id: &str) -> GeoFeature {
    let n: u32 = id.bytes().map(u32::from).sum();
    let longitude = -74.0 + f64::from(n % 10) * 0.01;
    let latitude = 40.70 + f64::from((n / 10) % 10) * 0.01;
    GeoFeature::point(format!("Antenna {id}"), longitude, latitude)
}

/// Returns the record of a primary antenna.
pub fn antenna(id: &str, performance: f64) -> AntennaRecord {
    AntennaRecord::new(id, feature(id), performance)
}

/// Returns the record of a helper antenna.
pub fn helper(id: &str, performance: f64) -> AntennaRecord {
    antenna(id, performance).as_helper()
}

fn payload(record: &AntennaRecord) -> Vec<u8> {
    record
        .encode()
        .expect("antenna fixtures always encode")
        .to_vec()
}

/// Upsert of a primary antenna.
pub fn antenna_row(id: &str, performance: f64, timestamp: u64) -> RawChangeRow {
    RawChangeRow::upsert(id, payload(&antenna(id, performance)), timestamp)
}

/// Retraction of a primary antenna.
pub fn antenna_retraction(id: &str, performance: f64, timestamp: u64) -> RawChangeRow {
    RawChangeRow::retract(id, payload(&antenna(id, performance)), timestamp)
}

/// Upsert of a helper antenna.
pub fn helper_row(id: &str, performance: f64, timestamp: u64) -> RawChangeRow {
    RawChangeRow::upsert(id, payload(&helper(id, performance)), timestamp)
}

/// Retraction of a helper antenna.
pub fn helper_retraction(id: &str, performance: f64, timestamp: u64) -> RawChangeRow {
    RawChangeRow::retract(id, payload(&helper(id, performance)), timestamp)
}

/// Progress marker.
pub fn progress(timestamp: u64) -> RawChangeRow {
    RawChangeRow::progress(timestamp)
}

/// A row whose payload does not decode.
pub fn garbage_row(id: &str, timestamp: u64) -> RawChangeRow {
    RawChangeRow::upsert(id, "not json", timestamp)
}

/// Builds the rows of consecutive progress intervals.
///
/// Each interval's rows are followed by a marker; markers are numbered
/// from 1 and every row of interval `n` carries timestamp `n`.
#[derive(Debug, Default)]
pub struct TailScript {
    rows: Vec<RawChangeRow>,
    interval: u64,
}

impl TailScript {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one interval: `(id, performance)` upserts, then a marker.
    pub fn interval(mut self, antennas: &[(&str, f64)]) -> Self {
        self.interval += 1;
        let ts = self.interval;
        self.rows.extend(
            antennas
                .iter()
                .map(|(id, performance)| antenna_row(id, *performance, ts)),
        );
        self.rows.push(progress(ts));
        self
    }

    /// Appends one interval of arbitrary rows, then a marker.
    pub fn rows(mut self, rows: Vec<RawChangeRow>) -> Self {
        self.interval += 1;
        self.rows.extend(rows);
        self.rows.push(progress(self.interval));
        self
    }

    /// Appends rows without closing the interval.
    pub fn trailing(mut self, rows: Vec<RawChangeRow>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Returns the number of intervals.
    pub fn intervals(&self) -> u64 {
        self.interval
    }

    /// Returns the scripted rows.
    pub fn build(self) -> Vec<RawChangeRow> {
        self.rows
    }
}

/// A JSON-lines recording of a tail in a temporary directory.
pub struct Recording {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl Recording {
    /// Writes `rows` as tail records, one JSON object per line.
    pub fn write(rows: &[RawChangeRow]) -> Self {
        let lines: Vec<String> = rows
            .iter()
            .map(|row| {
                let record = row.to_tail_record().expect("fixture rows are objects");
                Value::Object(record).to_string()
            })
            .collect();
        Self::write_lines(&lines)
    }

    /// Writes raw lines, for recordings with malformed entries.
    pub fn write_lines(lines: &[String]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("tail.jsonl");
        let mut file = std::fs::File::create(&path).expect("Failed to create recording");
        for line in lines {
            writeln!(file, "{line}").expect("Failed to write recording");
        }

        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the recording path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
