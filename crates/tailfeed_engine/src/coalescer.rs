//! Groups change rows into one batch per progress interval.

use std::collections::HashMap;
use tailfeed_protocol::{ChangeBatch, RawChangeRow};
use tracing::trace;

/// Buffers the latest row per entity key until a progress marker arrives.
///
/// Keys keep the order in which they were first seen within the interval;
/// a later row for the same key replaces the earlier one in place.
#[derive(Debug, Default)]
pub struct BatchCoalescer {
    index: HashMap<String, usize>,
    rows: Vec<RawChangeRow>,
    rows_seen: u64,
    batches_emitted: u64,
}

impl BatchCoalescer {
    /// Creates an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one row.
    ///
    /// Returns a batch when `row` is a progress marker. The batch may be
    /// empty if the interval carried no rows.
    pub fn push(&mut self, row: RawChangeRow) -> Option<ChangeBatch> {
        if row.is_progress_marker {
            let batch = ChangeBatch::new(self.take_rows(), row.logical_timestamp);
            self.batches_emitted += 1;
            trace!(
                progress = row.logical_timestamp,
                rows = batch.len(),
                "interval closed"
            );
            return Some(batch);
        }

        self.rows_seen += 1;
        match self.index.get(&row.entity_key) {
            Some(&slot) => self.rows[slot] = row,
            None => {
                self.index.insert(row.entity_key.clone(), self.rows.len());
                self.rows.push(row);
            }
        }
        None
    }

    /// Flushes buffered rows at end of stream.
    ///
    /// Returns nothing when the buffer is empty.
    pub fn finish(&mut self) -> Option<ChangeBatch> {
        if self.rows.is_empty() {
            return None;
        }
        self.batches_emitted += 1;
        Some(ChangeBatch::remainder(self.take_rows()))
    }

    /// Returns the number of distinct keys buffered.
    pub fn buffered(&self) -> usize {
        self.rows.len()
    }

    /// Returns the number of data rows consumed.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// Returns the number of batches emitted.
    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted
    }

    fn take_rows(&mut self) -> Vec<RawChangeRow> {
        self.index.clear();
        std::mem::take(&mut self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn upsert(key: &str, perf: f64, ts: u64) -> RawChangeRow {
        RawChangeRow::upsert(key, format!(r#"{{"performance":{perf}}}"#), ts)
    }

    fn keys(batch: &ChangeBatch) -> Vec<&str> {
        batch.iter().map(|row| row.entity_key.as_str()).collect()
    }

    #[test]
    fn rows_without_marker_emit_nothing() {
        let mut coalescer = BatchCoalescer::new();
        assert!(coalescer.push(upsert("1", 6.0, 1)).is_none());
        assert!(coalescer.push(upsert("2", 4.0, 1)).is_none());
        assert_eq!(coalescer.buffered(), 2);
    }

    #[test]
    fn marker_emits_latest_row_per_key() {
        let mut coalescer = BatchCoalescer::new();
        coalescer.push(upsert("1", 6.0, 1));
        coalescer.push(upsert("2", 4.0, 1));
        coalescer.push(upsert("1", 4.9, 2));

        let batch = coalescer.push(RawChangeRow::progress(3)).unwrap();
        assert_eq!(keys(&batch), vec!["1", "2"]);
        assert_eq!(batch.rows()[0].logical_timestamp, 2);
        assert_eq!(batch.progress(), Some(3));
        assert_eq!(coalescer.buffered(), 0);
    }

    #[test]
    fn retraction_replaces_upsert_within_interval() {
        let mut coalescer = BatchCoalescer::new();
        coalescer.push(upsert("1", 6.0, 1));
        coalescer.push(RawChangeRow::retract("1", r#"{"performance":6.0}"#, 1));

        let batch = coalescer.push(RawChangeRow::progress(2)).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.rows()[0].is_retraction());
    }

    #[test]
    fn empty_interval_emits_empty_batch() {
        let mut coalescer = BatchCoalescer::new();
        let batch = coalescer.push(RawChangeRow::progress(1)).unwrap();
        assert!(batch.is_empty());
        assert_eq!(coalescer.batches_emitted(), 1);
    }

    #[test]
    fn finish_flushes_remainder_once() {
        let mut coalescer = BatchCoalescer::new();
        coalescer.push(upsert("1", 6.0, 1));
        coalescer.push(RawChangeRow::progress(1));
        coalescer.push(upsert("2", 4.0, 2));

        let rest = coalescer.finish().unwrap();
        assert_eq!(keys(&rest), vec!["2"]);
        assert_eq!(rest.progress(), None);
        assert!(coalescer.finish().is_none());
    }

    #[test]
    fn finish_on_empty_buffer() {
        let mut coalescer = BatchCoalescer::new();
        assert!(coalescer.finish().is_none());
    }

    proptest! {
        #[test]
        fn batch_holds_last_row_per_key_in_first_seen_order(
            ops in proptest::collection::vec((0u8..6, 0u32..100), 0..64)
        ) {
            let mut coalescer = BatchCoalescer::new();
            let mut expected_order: Vec<String> = Vec::new();
            let mut expected_last: HashMap<String, u64> = HashMap::new();

            for (i, (key, perf)) in ops.iter().enumerate() {
                let key = key.to_string();
                if !expected_last.contains_key(&key) {
                    expected_order.push(key.clone());
                }
                expected_last.insert(key.clone(), i as u64);
                let row = upsert(&key, f64::from(*perf) / 10.0, i as u64);
                prop_assert!(coalescer.push(row).is_none());
            }

            let batch = coalescer.push(RawChangeRow::progress(u64::MAX)).unwrap();
            let got: Vec<String> = batch.iter().map(|r| r.entity_key.clone()).collect();
            prop_assert_eq!(&got, &expected_order);
            for row in batch.iter() {
                prop_assert_eq!(row.logical_timestamp, expected_last[&row.entity_key]);
            }
        }
    }
}
