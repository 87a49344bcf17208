//! Change batches: the rows of one progress interval.

use crate::row::RawChangeRow;

/// The rows of one progress interval, progress marker excluded.
///
/// A batch closed by a progress marker carries the marker's timestamp as
/// its `progress`. The remainder flushed when the upstream ends has no
/// marker and therefore no progress timestamp.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeBatch {
    rows: Vec<RawChangeRow>,
    progress: Option<u64>,
}

impl ChangeBatch {
    /// Creates a batch closed by a progress marker at `progress`.
    pub fn new(rows: Vec<RawChangeRow>, progress: u64) -> Self {
        Self {
            rows,
            progress: Some(progress),
        }
    }

    /// Creates the final batch emitted when the upstream ends.
    pub fn remainder(rows: Vec<RawChangeRow>) -> Self {
        Self {
            rows,
            progress: None,
        }
    }

    /// Returns the progress timestamp closing this batch, if any.
    pub fn progress(&self) -> Option<u64> {
        self.progress
    }

    /// Returns the rows in emission order.
    pub fn rows(&self) -> &[RawChangeRow] {
        &self.rows
    }

    /// Consumes the batch, returning its rows.
    pub fn into_rows(self) -> Vec<RawChangeRow> {
        self.rows
    }

    /// Returns an iterator over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, RawChangeRow> {
        self.rows.iter()
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the batch carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the latest logical timestamp covered by the batch.
    pub fn max_timestamp(&self) -> Option<u64> {
        self.rows
            .iter()
            .map(|row| row.logical_timestamp)
            .chain(self.progress)
            .max()
    }
}

impl<'a> IntoIterator for &'a ChangeBatch {
    type Item = &'a RawChangeRow;
    type IntoIter = std::slice::Iter<'a, RawChangeRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_batch() {
        let batch = ChangeBatch::new(vec![RawChangeRow::upsert("1", "{}", 4)], 5);
        assert_eq!(batch.progress(), Some(5));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.max_timestamp(), Some(5));
    }

    #[test]
    fn remainder_has_no_progress() {
        let batch = ChangeBatch::remainder(vec![
            RawChangeRow::upsert("1", "{}", 4),
            RawChangeRow::upsert("2", "{}", 7),
        ]);
        assert_eq!(batch.progress(), None);
        assert_eq!(batch.max_timestamp(), Some(7));
    }

    #[test]
    fn empty_batch() {
        let batch = ChangeBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.max_timestamp(), None);
        assert_eq!(batch.iter().count(), 0);
    }
}
