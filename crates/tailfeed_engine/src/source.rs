//! Cursor source abstraction: the store's side of the tail.

use crate::error::{TailError, TailResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tailfeed_protocol::RawChangeRow;
use tracing::{debug, info, warn};

/// A cursor-yielding service, usually one connection to the store.
///
/// This trait abstracts the store connection, allowing for different
/// implementations (recorded replays, mocks for testing).
pub trait CursorSource: Send {
    /// Declares a streaming cursor named `cursor` over `statement`.
    fn declare(&mut self, cursor: &str, statement: &str) -> TailResult<()>;

    /// Fetches up to `count` rows, waiting at most `timeout`.
    ///
    /// Returning no rows means nothing is available right now.
    fn fetch(&mut self, cursor: &str, count: usize, timeout: Duration)
        -> TailResult<Vec<RawChangeRow>>;

    /// Closes the cursor and releases the connection.
    fn close(&mut self, cursor: &str) -> TailResult<()>;

    /// Returns true once the upstream has ended and no row will follow.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// An open streaming cursor bound to one source connection.
pub struct CursorSession<S: CursorSource> {
    cursor: String,
    source: S,
    open: bool,
}

impl<S: CursorSource> CursorSession<S> {
    /// Declares a fresh cursor over `statement`.
    pub fn open(mut source: S, statement: &str) -> TailResult<Self> {
        let cursor = format!("tail_{}", uuid::Uuid::new_v4().simple());
        source.declare(&cursor, statement)?;
        info!(cursor = %cursor, statement, "cursor declared");

        Ok(Self {
            cursor,
            source,
            open: true,
        })
    }

    /// Returns the cursor name.
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Returns true until the session is closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns true once the upstream has ended.
    pub fn is_exhausted(&self) -> bool {
        self.source.is_exhausted()
    }

    /// Returns the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetches up to `count` rows.
    pub fn fetch(&mut self, count: usize, timeout: Duration) -> TailResult<Vec<RawChangeRow>> {
        if !self.open {
            return Err(TailError::Closed);
        }
        self.source.fetch(&self.cursor, count, timeout)
    }

    /// Closes the cursor. Closing twice is a no-op.
    pub fn close(&mut self) -> TailResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        debug!(cursor = %self.cursor, "closing cursor");
        self.source.close(&self.cursor).inspect_err(|e| {
            warn!(cursor = %self.cursor, error = %e, "cursor close failed");
        })
    }
}

/// A scripted fetch result for [`MockCursorSource`].
#[derive(Debug, Clone)]
pub enum MockFetch {
    /// The fetch returns these rows.
    Rows(Vec<RawChangeRow>),
    /// The fetch fails.
    Fail {
        /// Error message.
        message: String,
        /// Whether the failure is retryable.
        retryable: bool,
    },
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockFetch>,
    declared: Vec<String>,
    fetch_requests: Vec<usize>,
    closed: bool,
    end_when_drained: bool,
    declare_failure: Option<String>,
}

/// A mock source for testing.
///
/// Clones share state, so a test can keep a handle after moving the
/// source into a reader.
#[derive(Debug, Clone, Default)]
pub struct MockCursorSource {
    state: Arc<Mutex<MockState>>,
}

impl MockCursorSource {
    /// Creates a mock source with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts one fetch returning `rows`.
    pub fn push_rows(&self, rows: Vec<RawChangeRow>) -> &Self {
        self.state.lock().script.push_back(MockFetch::Rows(rows));
        self
    }

    /// Scripts one failing fetch.
    pub fn push_failure(&self, message: impl Into<String>, retryable: bool) -> &Self {
        self.state.lock().script.push_back(MockFetch::Fail {
            message: message.into(),
            retryable,
        });
        self
    }

    /// Reports the upstream as ended once the script is drained.
    pub fn end_when_drained(&self) -> &Self {
        self.state.lock().end_when_drained = true;
        self
    }

    /// Makes cursor declaration fail.
    pub fn fail_declare(&self, message: impl Into<String>) -> &Self {
        self.state.lock().declare_failure = Some(message.into());
        self
    }

    /// Returns the statements declared so far.
    pub fn declared(&self) -> Vec<String> {
        self.state.lock().declared.clone()
    }

    /// Returns the row counts requested by each fetch.
    pub fn fetch_requests(&self) -> Vec<usize> {
        self.state.lock().fetch_requests.clone()
    }

    /// Returns true once the cursor was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of scripted fetches not yet consumed.
    pub fn remaining(&self) -> usize {
        self.state.lock().script.len()
    }
}

impl CursorSource for MockCursorSource {
    fn declare(&mut self, _cursor: &str, statement: &str) -> TailResult<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.declare_failure.clone() {
            return Err(TailError::fetch_fatal(message));
        }
        state.declared.push(statement.to_string());
        Ok(())
    }

    fn fetch(
        &mut self,
        cursor: &str,
        count: usize,
        _timeout: Duration,
    ) -> TailResult<Vec<RawChangeRow>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TailError::fetch_fatal(format!("cursor {cursor:?} is closed")));
        }
        state.fetch_requests.push(count);

        match state.script.pop_front() {
            Some(MockFetch::Rows(mut rows)) => {
                // The server keeps whatever the fetch did not ask for.
                if rows.len() > count {
                    let rest = rows.split_off(count);
                    state.script.push_front(MockFetch::Rows(rest));
                }
                Ok(rows)
            }
            Some(MockFetch::Fail { message, retryable }) => Err(TailError::Fetch { message, retryable }),
            None => Ok(Vec::new()),
        }
    }

    fn close(&mut self, _cursor: &str) -> TailResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        let state = self.state.lock();
        state.end_when_drained && state.script.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_declares_and_closes() {
        let source = MockCursorSource::new();
        let mut session = CursorSession::open(source.clone(), "TAIL v WITH (PROGRESS)").unwrap();

        assert!(session.cursor().starts_with("tail_"));
        assert_eq!(source.declared(), vec!["TAIL v WITH (PROGRESS)".to_string()]);

        session.close().unwrap();
        session.close().unwrap();
        assert!(source.is_closed());
        assert!(matches!(
            session.fetch(1, Duration::from_secs(1)),
            Err(TailError::Closed)
        ));
    }

    #[test]
    fn declare_failure() {
        let source = MockCursorSource::new();
        source.fail_declare("relation does not exist");
        assert!(CursorSession::open(source, "TAIL missing").is_err());
    }

    #[test]
    fn mock_splits_oversized_fetches() {
        let mut source = MockCursorSource::new();
        source.push_rows((0..5).map(RawChangeRow::progress).collect());

        let first = source.fetch("c", 3, Duration::ZERO).unwrap();
        assert_eq!(first.len(), 3);
        let second = source.fetch("c", 3, Duration::ZERO).unwrap();
        assert_eq!(second.len(), 2);
        assert!(source.fetch("c", 3, Duration::ZERO).unwrap().is_empty());
        assert_eq!(source.fetch_requests(), vec![3, 3, 3]);
    }

    #[test]
    fn mock_exhaustion() {
        let source = MockCursorSource::new();
        source.push_rows(vec![RawChangeRow::progress(1)]).end_when_drained();
        assert!(!source.is_exhausted());

        let mut handle = source.clone();
        handle.fetch("c", 10, Duration::ZERO).unwrap();
        assert!(source.is_exhausted());
    }
}
