//! Backpressure-aware reader over a streaming cursor.

use crate::config::TailConfig;
use crate::error::{TailError, TailResult};
use crate::source::{CursorSession, CursorSource};
use std::collections::VecDeque;
use std::time::Duration;
use tailfeed_protocol::RawChangeRow;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Downstream of a [`CursorReader`].
pub trait RowSink {
    /// Offers one row. A full downstream hands the row back.
    fn offer(&mut self, row: RawChangeRow) -> Result<(), RawChangeRow>;
}

impl RowSink for Vec<RawChangeRow> {
    fn offer(&mut self, row: RawChangeRow) -> Result<(), RawChangeRow> {
        self.push(row);
        Ok(())
    }
}

impl RowSink for mpsc::Sender<RawChangeRow> {
    fn offer(&mut self, row: RawChangeRow) -> Result<(), RawChangeRow> {
        self.try_send(row).map_err(|e| match e {
            mpsc::error::TrySendError::Full(row) | mpsc::error::TrySendError::Closed(row) => row,
        })
    }
}

/// A bounded FIFO queue of rows that refuses offers once full.
#[derive(Debug)]
pub struct BoundedRowQueue {
    rows: VecDeque<RawChangeRow>,
    capacity: usize,
}

impl BoundedRowQueue {
    /// Creates a queue holding at most `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Removes the oldest row.
    pub fn pop(&mut self) -> Option<RawChangeRow> {
        self.rows.pop_front()
    }

    /// Returns the number of queued rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no row is queued.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if the next offer would be refused.
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }
}

impl RowSink for BoundedRowQueue {
    fn offer(&mut self, row: RawChangeRow) -> Result<(), RawChangeRow> {
        if self.is_full() {
            return Err(row);
        }
        self.rows.push_back(row);
        Ok(())
    }
}

/// Lifecycle of a [`CursorReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// The cursor is open and can be pulled.
    Open,
    /// A fetch failed; terminal.
    Failed,
    /// The reader was closed; terminal.
    Closed,
}

/// Pull-based adapter over a streaming cursor.
///
/// Rows fetched but not yet accepted downstream stay in `pending` and are
/// delivered, oldest first, before the cursor is fetched again. A fetch
/// failure is terminal: the reader never reopens its cursor.
pub struct CursorReader<S: CursorSource> {
    session: CursorSession<S>,
    pending: VecDeque<RawChangeRow>,
    fetch_timeout: Duration,
    state: ReaderState,
    failure: Option<(String, bool)>,
    rows_fetched: u64,
    empty_fetches: u64,
}

impl<S: CursorSource> CursorReader<S> {
    /// Declares a cursor over the configured view and wraps it.
    pub fn open(source: S, config: &TailConfig) -> TailResult<Self> {
        let session = CursorSession::open(source, &config.tail_statement())?;
        Ok(Self::from_session(session, config.fetch_timeout))
    }

    /// Wraps an already open session.
    pub fn from_session(session: CursorSession<S>, fetch_timeout: Duration) -> Self {
        Self {
            session,
            pending: VecDeque::new(),
            fetch_timeout,
            state: ReaderState::Open,
            failure: None,
            rows_fetched: 0,
            empty_fetches: 0,
        }
    }

    /// Returns the reader state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Returns the cursor session.
    pub fn session(&self) -> &CursorSession<S> {
        &self.session
    }

    /// Returns the number of fetched rows not yet delivered.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the total number of rows fetched.
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// Returns the number of fetches that came back empty.
    pub fn empty_fetches(&self) -> u64 {
        self.empty_fetches
    }

    /// Returns true once every upstream row has been delivered.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.session.is_exhausted()
    }

    /// Delivers up to `demand` rows into `sink`.
    ///
    /// Buffered rows go first; the cursor is only fetched when nothing is
    /// buffered. Delivery stops at the first refused row, which stays at
    /// the front of the buffer. Returns the number of rows delivered,
    /// which may be zero when no data is currently available.
    pub fn pull<K: RowSink + ?Sized>(&mut self, demand: usize, sink: &mut K) -> TailResult<usize> {
        self.ensure_open()?;
        if demand == 0 {
            return Ok(0);
        }

        if self.pending.is_empty() {
            match self.session.fetch(demand, self.fetch_timeout) {
                Ok(rows) if rows.is_empty() => {
                    self.empty_fetches += 1;
                    trace!(cursor = %self.session.cursor(), "fetch returned no rows");
                    return Ok(0);
                }
                Ok(rows) => {
                    self.rows_fetched += rows.len() as u64;
                    self.pending.extend(rows);
                }
                Err(e) => {
                    warn!(cursor = %self.session.cursor(), error = %e, "fetch failed");
                    self.failure = Some((e.to_string(), e.is_retryable()));
                    self.state = ReaderState::Failed;
                    return Err(e);
                }
            }
        }

        let mut delivered = 0;
        while delivered < demand {
            let Some(row) = self.pending.pop_front() else {
                break;
            };
            if let Err(row) = sink.offer(row) {
                self.pending.push_front(row);
                debug!(
                    pending = self.pending.len(),
                    delivered, "downstream full, pausing delivery"
                );
                break;
            }
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Pulls up to `max_rows` rows into a vector.
    pub fn next(&mut self, max_rows: usize) -> TailResult<Vec<RawChangeRow>> {
        let mut rows = Vec::with_capacity(max_rows.min(self.pending.len().max(1)));
        self.pull(max_rows, &mut rows)?;
        Ok(rows)
    }

    /// Closes the cursor and drops buffered rows.
    pub fn close(&mut self) -> TailResult<()> {
        self.pending.clear();
        if self.state != ReaderState::Failed {
            self.state = ReaderState::Closed;
        }
        self.session.close()
    }

    fn ensure_open(&self) -> TailResult<()> {
        match self.state {
            ReaderState::Open => Ok(()),
            ReaderState::Closed => Err(TailError::Closed),
            ReaderState::Failed => {
                let (message, retryable) = self
                    .failure
                    .clone()
                    .unwrap_or_else(|| ("reader failed".to_string(), false));
                Err(TailError::Fetch { message, retryable })
            }
        }
    }
}

impl<S: CursorSource> Drop for CursorReader<S> {
    fn drop(&mut self) {
        if self.session.is_open() {
            let _ = self.session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockCursorSource;

    fn rows(keys: &[&str]) -> Vec<RawChangeRow> {
        keys.iter()
            .enumerate()
            .map(|(ts, key)| RawChangeRow::upsert(*key, "{}", ts as u64))
            .collect()
    }

    fn keys(rows: &[RawChangeRow]) -> Vec<&str> {
        rows.iter().map(|row| row.entity_key.as_str()).collect()
    }

    fn open(source: &MockCursorSource) -> CursorReader<MockCursorSource> {
        CursorReader::open(source.clone(), &TailConfig::new("v")).unwrap()
    }

    #[test]
    fn empty_fetch_is_not_an_error() {
        let source = MockCursorSource::new();
        let mut reader = open(&source);

        assert!(reader.next(10).unwrap().is_empty());
        assert!(reader.next(10).unwrap().is_empty());
        assert_eq!(reader.empty_fetches(), 2);
        assert_eq!(reader.state(), ReaderState::Open);
    }

    #[test]
    fn pending_rows_are_drained_before_fetching() {
        let source = MockCursorSource::new();
        source.push_rows(rows(&["a", "b", "c", "d", "e"]));
        let mut reader = open(&source);

        // Fetch asks for 5 rows but the sink only takes 2.
        let mut queue = BoundedRowQueue::new(2);
        assert_eq!(reader.pull(5, &mut queue).unwrap(), 2);
        assert_eq!(reader.pending_len(), 3);

        // Next pull resumes from "c" without touching the cursor.
        let next = reader.next(10).unwrap();
        assert_eq!(keys(&next), vec!["c", "d", "e"]);
        assert_eq!(source.fetch_requests(), vec![5]);
    }

    #[test]
    fn refused_row_is_not_lost() {
        let source = MockCursorSource::new();
        source.push_rows(rows(&["a", "b", "c"]));
        let mut reader = open(&source);

        let mut queue = BoundedRowQueue::new(1);
        assert_eq!(reader.pull(3, &mut queue).unwrap(), 1);
        assert_eq!(queue.pop().unwrap().entity_key, "a");

        assert_eq!(reader.pull(3, &mut queue).unwrap(), 1);
        assert_eq!(queue.pop().unwrap().entity_key, "b");

        assert_eq!(reader.pull(3, &mut queue).unwrap(), 1);
        assert_eq!(queue.pop().unwrap().entity_key, "c");
        assert_eq!(reader.pending_len(), 0);
    }

    #[test]
    fn demand_limits_delivery_from_pending() {
        let source = MockCursorSource::new();
        source.push_rows(rows(&["a", "b", "c", "d"]));
        let mut reader = open(&source);

        let mut queue = BoundedRowQueue::new(1);
        reader.pull(4, &mut queue).unwrap();

        let next = reader.next(2).unwrap();
        assert_eq!(keys(&next), vec!["b", "c"]);
        assert_eq!(reader.pending_len(), 1);
    }

    #[test]
    fn zero_demand_does_not_fetch() {
        let source = MockCursorSource::new();
        let mut reader = open(&source);
        assert_eq!(reader.pull(0, &mut Vec::new()).unwrap(), 0);
        assert!(source.fetch_requests().is_empty());
    }

    #[test]
    fn fetch_failure_is_terminal() {
        let source = MockCursorSource::new();
        source.push_failure("connection reset by peer", true);
        source.push_rows(rows(&["a"]));
        let mut reader = open(&source);

        let err = reader.next(10).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(reader.state(), ReaderState::Failed);

        // No automatic retry: the scripted rows are never fetched.
        assert!(reader.next(10).is_err());
        assert_eq!(source.remaining(), 1);
    }

    #[test]
    fn close_releases_cursor() {
        let source = MockCursorSource::new();
        let mut reader = open(&source);

        reader.close().unwrap();
        assert!(source.is_closed());
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(matches!(reader.next(1), Err(TailError::Closed)));
    }

    #[test]
    fn drop_closes_cursor() {
        let source = MockCursorSource::new();
        drop(open(&source));
        assert!(source.is_closed());
    }

    #[test]
    fn exhaustion_waits_for_pending_rows() {
        let source = MockCursorSource::new();
        source.push_rows(rows(&["a", "b"])).end_when_drained();
        let mut reader = open(&source);

        let mut queue = BoundedRowQueue::new(1);
        reader.pull(2, &mut queue).unwrap();
        assert!(!reader.is_exhausted());

        reader.next(2).unwrap();
        assert!(reader.is_exhausted());
    }

    #[tokio::test]
    async fn channel_sink_applies_backpressure() {
        let source = MockCursorSource::new();
        source.push_rows(rows(&["a", "b", "c"]));
        let mut reader = open(&source);

        let (mut tx, mut rx) = mpsc::channel(2);
        assert_eq!(reader.pull(3, &mut tx).unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap().entity_key, "a");
        assert_eq!(rx.recv().await.unwrap().entity_key, "b");

        assert_eq!(reader.pull(3, &mut tx).unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().entity_key, "c");
    }
}
