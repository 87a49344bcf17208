//! Inspect command implementation.

use crate::recording::Recording;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tailfeed_protocol::{AntennaRecord, RawChangeRow};

/// Recording inspection result.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// Recording path.
    pub path: String,
    /// Data rows.
    pub data_rows: usize,
    /// Progress markers.
    pub progress_markers: usize,
    /// Upsert rows.
    pub upserts: usize,
    /// Retraction rows.
    pub retractions: usize,
    /// Rows whose payload does not decode.
    pub undecodable_rows: usize,
    /// Lines that were not tail records.
    pub skipped_lines: usize,
    /// Distinct primary antennas.
    pub antennas: usize,
    /// Distinct helper antennas.
    pub helpers: usize,
    /// Earliest logical timestamp.
    pub first_timestamp: Option<u64>,
    /// Latest logical timestamp.
    pub last_timestamp: Option<u64>,
    /// Antenna ids (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

impl InspectResult {
    /// Summarises recorded rows.
    pub fn from_rows(path: &Path, rows: &[RawChangeRow], show_keys: bool) -> Self {
        let mut result = InspectResult {
            path: path.display().to_string(),
            ..Default::default()
        };
        let mut antennas = BTreeSet::new();
        let mut helpers = BTreeSet::new();

        for row in rows {
            let ts = row.logical_timestamp;
            result.first_timestamp = Some(result.first_timestamp.map_or(ts, |t| t.min(ts)));
            result.last_timestamp = Some(result.last_timestamp.map_or(ts, |t| t.max(ts)));

            if row.is_progress_marker {
                result.progress_markers += 1;
                continue;
            }

            result.data_rows += 1;
            if row.is_retraction() {
                result.retractions += 1;
            } else {
                result.upserts += 1;
            }

            match AntennaRecord::decode(&row.entity_key, &row.payload) {
                Ok(record) if record.helper => {
                    helpers.insert(row.entity_key.clone());
                }
                Ok(_) => {
                    antennas.insert(row.entity_key.clone());
                }
                Err(_) => result.undecodable_rows += 1,
            }
        }

        result.antennas = antennas.len();
        result.helpers = helpers.len();
        if show_keys {
            result.keys = Some(antennas.into_iter().chain(helpers).collect());
        }
        result
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_keys: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let recording = Recording::read(path)?;
    let mut result = InspectResult::from_rows(path, &recording.rows, show_keys);
    result.skipped_lines = recording.skipped;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Tail Recording Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Rows:");
    println!("  Data rows:        {}", result.data_rows);
    println!("  Upserts:          {}", result.upserts);
    println!("  Retractions:      {}", result.retractions);
    println!("  Progress markers: {}", result.progress_markers);
    println!("  Undecodable:      {}", result.undecodable_rows);
    println!("  Skipped lines:    {}", result.skipped_lines);
    println!();
    println!("Antennas:");
    println!("  Primary: {}", result.antennas);
    println!("  Helpers: {}", result.helpers);
    if let (Some(first), Some(last)) = (result.first_timestamp, result.last_timestamp) {
        println!();
        println!("Timestamps: {first} .. {last}");
    }

    if let Some(keys) = &result.keys {
        println!();
        println!("Keys: {}", keys.join(", "));
    }
}
