//! Snapshot sinks: where subscriptions deliver their snapshots.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tailfeed_engine::Snapshot;
use tailfeed_protocol::{AntennaUpdate, SubscriptionFrame};
use tokio::sync::mpsc;

/// Receives the snapshots of one subscription, in order.
pub trait SnapshotSink: Send {
    /// Delivers one snapshot.
    fn publish(&mut self, snapshot: Arc<Snapshot>)
        -> impl Future<Output = ServerResult<()>> + Send;

    /// Ends the sequence. `reason` is set when the upstream failed.
    fn end(&mut self, reason: Option<String>) -> impl Future<Output = ServerResult<()>> + Send;
}

/// Builds the wire frame of a snapshot.
pub fn snapshot_frame(snapshot: &Snapshot) -> ServerResult<SubscriptionFrame> {
    let antennas = snapshot
        .primary
        .values()
        .map(|entity| AntennaUpdate::from_record(&entity.attributes, entity.performance_class))
        .collect::<Result<Vec<_>, _>>()?;
    let helpers = snapshot
        .helpers
        .values()
        .map(|helper| {
            AntennaUpdate::from_record(&helper.entity.attributes, helper.entity.performance_class)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SubscriptionFrame::Snapshot {
        version: snapshot.version,
        antennas,
        helpers,
    })
}

/// Sends CBOR-encoded frames over a channel.
///
/// The channel is bounded, so a slow subscriber makes the subscription
/// wait; the bridge upstream keeps the tail itself from waiting.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl FrameSink {
    /// Creates a sink and the receiver of its encoded frames.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, frame: SubscriptionFrame) -> ServerResult<()> {
        let bytes = frame.encode()?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| ServerError::Disconnected)
    }
}

impl SnapshotSink for FrameSink {
    async fn publish(&mut self, snapshot: Arc<Snapshot>) -> ServerResult<()> {
        let frame = snapshot_frame(&snapshot)?;
        self.send(frame).await
    }

    async fn end(&mut self, reason: Option<String>) -> ServerResult<()> {
        self.send(SubscriptionFrame::End { reason }).await
    }
}

/// What a [`MemorySink`] has received.
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    /// Snapshots in delivery order.
    pub snapshots: Vec<Arc<Snapshot>>,
    /// Set once the sequence ended; holds the failure reason if any.
    pub ended: Option<Option<String>>,
}

/// Collects snapshots in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of what was received so far.
    pub fn log(&self) -> SinkLog {
        self.log.lock().clone()
    }

    /// Returns the most recent snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.log.lock().snapshots.last().cloned()
    }

    /// Returns true once the sequence ended.
    pub fn is_ended(&self) -> bool {
        self.log.lock().ended.is_some()
    }
}

impl SnapshotSink for MemorySink {
    async fn publish(&mut self, snapshot: Arc<Snapshot>) -> ServerResult<()> {
        self.log.lock().snapshots.push(snapshot);
        Ok(())
    }

    async fn end(&mut self, reason: Option<String>) -> ServerResult<()> {
        self.log.lock().ended = Some(reason);
        Ok(())
    }
}
