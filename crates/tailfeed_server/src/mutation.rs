//! Administrative writes into the store the tail follows.

use crate::config::SubscriptionConfig;
use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tailfeed_protocol::PerformanceEvent;
use tracing::info;

/// Writes performance samples into the store.
///
/// Written samples reach subscribers only through the tailed view, like
/// any other write.
pub trait StoreWriter: Send + Sync {
    /// Writes one sample.
    fn write(&self, event: &PerformanceEvent) -> ServerResult<()>;
}

/// Request to degrade one antenna.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradeRequest {
    /// Antenna to degrade.
    pub antenna_id: String,
    /// Connected clients to report; the configured default when unset.
    pub clients_connected: Option<u32>,
}

impl DegradeRequest {
    /// Creates a request for `antenna_id`.
    pub fn new(antenna_id: impl Into<String>) -> Self {
        Self {
            antenna_id: antenna_id.into(),
            clients_connected: None,
        }
    }

    /// Sets the connected clients to report.
    pub fn with_clients(mut self, clients: u32) -> Self {
        self.clients_connected = Some(clients);
        self
    }
}

/// Builds the synthetic low-performance sample for a degrade request.
pub fn degrade_event(
    request: &DegradeRequest,
    config: &SubscriptionConfig,
    updated_at: u64,
) -> ServerResult<PerformanceEvent> {
    let antenna_id = request.antenna_id.trim();
    if antenna_id.is_empty() {
        return Err(ServerError::InvalidRequest("antenna id is empty".into()));
    }

    Ok(PerformanceEvent::new(
        antenna_id,
        request.clients_connected.unwrap_or(config.degraded_clients),
        config.degraded_performance,
        updated_at,
    ))
}

/// Returns the current time as Unix milliseconds.
pub fn now_millis() -> ServerResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .map_err(|e| ServerError::Internal(format!("system clock before epoch: {e}")))
}

/// In-memory store of performance samples.
///
/// Samples are kept in write order and numbered from 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<Vec<PerformanceEvent>>,
    failure: RwLock<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with `message`.
    pub fn fail_writes(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Returns the sequence number of the last write, 0 when empty.
    pub fn cursor(&self) -> u64 {
        self.events.read().len() as u64
    }

    /// Returns the samples written after `cursor`, at most `limit`.
    pub fn events_since(&self, cursor: u64, limit: usize) -> Vec<PerformanceEvent> {
        self.events
            .read()
            .iter()
            .skip(cursor as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl StoreWriter for MemoryStore {
    fn write(&self, event: &PerformanceEvent) -> ServerResult<()> {
        if let Some(message) = self.failure.read().clone() {
            return Err(ServerError::Store(message));
        }
        self.events.write().push(event.clone());
        info!(antenna_id = %event.antenna_id, performance = event.performance, "sample written");
        Ok(())
    }
}
