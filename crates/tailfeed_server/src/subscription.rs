//! Subscription tasks: bridge consumer, reconciler and sink.

use crate::error::{ServerError, ServerResult};
use crate::sink::SnapshotSink;
use tailfeed_engine::{
    BatchConsumer, StateReconciler, TailControl, TailError, TailResult, TailStats,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a subscription ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionSummary {
    /// Snapshots handed to the sink.
    pub snapshots_published: u64,
    /// Version of the last snapshot handed to the sink.
    pub last_version: u64,
    /// Why the upstream ended, if it failed.
    pub reason: Option<String>,
}

/// Pulls batches from the bridge until the tail terminates.
///
/// Every applied batch produces one snapshot for the sink. When the sink
/// fails the tail is cancelled; when the tail ends the sink is ended with
/// the upstream's failure reason, if any.
pub async fn consume<K: SnapshotSink>(
    id: Uuid,
    consumer: BatchConsumer,
    mut reconciler: StateReconciler,
    mut sink: K,
    control: TailControl,
) -> ServerResult<SubscriptionSummary> {
    let mut summary = SubscriptionSummary::default();

    loop {
        let batch = match consumer.recv().await {
            Ok(batch) => batch,
            Err(TailError::BridgeTerminated) => break,
            Err(e) => {
                control.cancel();
                return Err(e.into());
            }
        };

        let Some(snapshot) = reconciler.apply(&batch) else {
            continue;
        };
        let version = snapshot.version;
        if let Err(e) = sink.publish(snapshot).await {
            warn!(subscription = %id, error = %e, "sink failed, cancelling tail");
            control.cancel();
            return Err(e);
        }
        summary.snapshots_published += 1;
        summary.last_version = version;
        debug!(subscription = %id, version, "snapshot delivered");
    }

    summary.reason = consumer
        .termination()
        .and_then(|termination| termination.reason().map(str::to_string));
    sink.end(summary.reason.clone()).await?;

    info!(
        subscription = %id,
        snapshots = summary.snapshots_published,
        reason = ?summary.reason,
        "subscription ended"
    );
    Ok(summary)
}

/// A running subscription.
pub struct SubscriptionHandle {
    id: Uuid,
    control: TailControl,
    consumer_task: JoinHandle<ServerResult<SubscriptionSummary>>,
    tail_task: JoinHandle<TailResult<TailStats>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: Uuid,
        control: TailControl,
        consumer_task: JoinHandle<ServerResult<SubscriptionSummary>>,
        tail_task: JoinHandle<TailResult<TailStats>>,
    ) -> Self {
        Self {
            id,
            control,
            consumer_task,
            tail_task,
        }
    }

    /// Returns the subscription id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the tail control.
    pub fn control(&self) -> &TailControl {
        &self.control
    }

    /// Cancels the subscription. Its sink is still ended.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Waits for both tasks to finish.
    ///
    /// A failed tail is not an error here: it shows up as the summary's
    /// `reason`.
    pub async fn join(self) -> ServerResult<(SubscriptionSummary, TailStats)> {
        let summary = self
            .consumer_task
            .await
            .map_err(|e| ServerError::Internal(format!("subscription task: {e}")))??;
        let stats = match self
            .tail_task
            .await
            .map_err(|e| ServerError::Internal(format!("tail task: {e}")))?
        {
            Ok(stats) => stats,
            Err(_) => self.control.stats(),
        };
        Ok((summary, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::time::Duration;
    use tailfeed_engine::{spawn_tail, MockCursorSource, TailConfig, TailState};
    use tailfeed_testkit::{antenna_row, progress, TailScript};

    #[tokio::test]
    async fn delivers_snapshots_then_ends() {
        let source = MockCursorSource::new();
        source
            .push_rows(TailScript::new().interval(&[("1", 6.0), ("2", 4.0)]).build())
            .end_when_drained();

        let config = TailConfig::default();
        let tail = spawn_tail(source, config.clone()).unwrap();
        let sink = MemorySink::new();

        let summary = consume(
            Uuid::new_v4(),
            tail.consumer,
            StateReconciler::new(&config),
            sink.clone(),
            tail.control,
        )
        .await
        .unwrap();

        assert_eq!(summary.snapshots_published, 1);
        assert_eq!(summary.reason, None);
        assert_eq!(sink.latest().unwrap().primary.len(), 2);
        assert_eq!(sink.log().ended, Some(None));
    }

    #[tokio::test]
    async fn upstream_failure_ends_with_reason() {
        let source = MockCursorSource::new();
        source
            .push_rows(vec![antenna_row("1", 6.0, 1), progress(1)])
            .push_failure("connection reset by peer", true);

        let config = TailConfig::default();
        let tail = spawn_tail(source, config.clone()).unwrap();
        let sink = MemorySink::new();

        let summary = tokio::time::timeout(
            Duration::from_secs(2),
            consume(
                Uuid::new_v4(),
                tail.consumer,
                StateReconciler::new(&config),
                sink.clone(),
                tail.control.clone(),
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(summary.reason.unwrap().contains("connection reset"));
        assert!(sink.is_ended());
        assert!(tail.task.await.unwrap().is_err());
        assert_eq!(tail.control.state(), TailState::Failed);
    }

    #[tokio::test]
    async fn handle_cancels_live_tail() {
        let source = MockCursorSource::new();
        let config = TailConfig::default();
        let tail = spawn_tail(source.clone(), config.clone()).unwrap();
        let sink = MemorySink::new();
        let id = Uuid::new_v4();

        let consumer_task = tokio::spawn(consume(
            id,
            tail.consumer,
            StateReconciler::new(&config),
            sink.clone(),
            tail.control.clone(),
        ));
        let handle = SubscriptionHandle::new(id, tail.control, consumer_task, tail.task);
        assert_eq!(handle.id(), id);

        handle.cancel();
        let (summary, _stats) = tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.snapshots_published, 0);
        assert!(sink.is_ended());
        assert!(source.is_closed());
    }
}
