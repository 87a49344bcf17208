//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use tailfeed_protocol::{ChangeBatch, RawChangeRow};
use tailfeed_testkit::{antenna_retraction, antenna_row, helper_row, progress};

/// Deterministic performance for antenna `i` in interval `interval`.
pub fn performance(i: usize, interval: u64) -> f64 {
    3.0 + ((i as u64 * 7 + interval * 13) % 40) as f64 / 10.0
}

/// Generates a tail of `intervals` progress intervals over `antennas` antennas.
///
/// Every interval retracts the previous value of each antenna and upserts
/// the new one, and every tenth antenna is a helper.
pub fn generate_tail(antennas: usize, intervals: u64) -> Vec<RawChangeRow> {
    let mut rows = Vec::with_capacity(antennas * intervals as usize * 2 + intervals as usize);
    for interval in 1..=intervals {
        for i in 0..antennas {
            let id = i.to_string();
            if i % 10 == 9 {
                rows.push(helper_row(&format!("H{id}"), performance(i, interval), interval));
                continue;
            }
            if interval > 1 {
                rows.push(antenna_retraction(&id, performance(i, interval - 1), interval));
            }
            rows.push(antenna_row(&id, performance(i, interval), interval));
        }
        rows.push(progress(interval));
    }
    rows
}

/// Splits a tail into the batches a coalescer would emit.
pub fn generate_batches(antennas: usize, intervals: u64) -> Vec<ChangeBatch> {
    let mut batches = Vec::with_capacity(intervals as usize);
    let mut current = Vec::new();
    for row in generate_tail(antennas, intervals) {
        if row.is_progress_marker {
            batches.push(ChangeBatch::new(std::mem::take(&mut current), row.logical_timestamp));
        } else {
            current.push(row);
        }
    }
    batches
}
