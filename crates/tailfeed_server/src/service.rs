//! The antenna subscription service.

use crate::config::SubscriptionConfig;
use crate::error::{ServerError, ServerResult};
use crate::mutation::{degrade_event, now_millis, DegradeRequest, StoreWriter};
use crate::sink::SnapshotSink;
use crate::subscription::{consume, SubscriptionHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tailfeed_engine::{
    spawn_tail, CursorSource, Snapshot, SnapshotHandle, StateReconciler, TailControl,
};
use tailfeed_protocol::{AntennaUpdate, PerformanceEvent};
use tracing::info;
use uuid::Uuid;

/// Serves antenna subscriptions, the current-state query and the degrade
/// mutation.
///
/// Each subscription runs its own tail pipeline and reconciler. The
/// current-state query serves the freshest snapshot among the running
/// subscriptions and the last one to finish.
///
/// # Example
///
/// ```rust,ignore
/// use tailfeed_server::{AntennaService, MemorySink, MemoryStore, SubscriptionConfig};
///
/// let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
/// let subscription = service.subscribe(source, MemorySink::new())?;
/// // ...
/// subscription.cancel();
/// ```
pub struct AntennaService<W: StoreWriter> {
    config: SubscriptionConfig,
    store: Arc<W>,
    active: Arc<RwLock<HashMap<Uuid, Subscriber>>>,
    retired: Arc<RwLock<Arc<Snapshot>>>,
}

struct Subscriber {
    control: TailControl,
    snapshots: SnapshotHandle,
}

impl<W: StoreWriter> AntennaService<W> {
    /// Creates a service writing mutations to `store`.
    pub fn new(config: SubscriptionConfig, store: W) -> Self {
        Self::with_store(config, Arc::new(store))
    }

    /// Creates a service sharing an existing store.
    pub fn with_store(config: SubscriptionConfig, store: Arc<W>) -> Self {
        Self {
            config,
            store,
            active: Arc::new(RwLock::new(HashMap::new())),
            retired: Arc::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<W> {
        &self.store
    }

    /// Starts a subscription tailing `source` into `sink`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<S, K>(&self, source: S, sink: K) -> ServerResult<SubscriptionHandle>
    where
        S: CursorSource + 'static,
        K: SnapshotSink + 'static,
    {
        let tail = spawn_tail(source, self.config.tail.clone())?;
        let id = Uuid::new_v4();
        let reconciler = StateReconciler::new(&self.config.tail);

        self.active.write().insert(
            id,
            Subscriber {
                control: tail.control.clone(),
                snapshots: reconciler.handle(),
            },
        );
        let active = Arc::clone(&self.active);
        let retired = Arc::clone(&self.retired);
        let consumer = tail.consumer;
        let control = tail.control.clone();
        let consumer_task = tokio::spawn(async move {
            let result = consume(id, consumer, reconciler, sink, control).await;
            let mut active = active.write();
            if let Some(subscriber) = active.remove(&id) {
                let last = subscriber.snapshots.load();
                let mut retired = retired.write();
                if last.is_fresher_than(&retired) {
                    *retired = last;
                }
            }
            result
        });

        info!(subscription = %id, view = %self.config.tail.view, "subscription started");
        Ok(SubscriptionHandle::new(id, tail.control, consumer_task, tail.task))
    }

    /// Returns the number of running subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.active.read().len()
    }

    /// Cancels every running subscription.
    pub fn cancel_all(&self) {
        for subscriber in self.active.read().values() {
            subscriber.control.cancel();
        }
    }

    /// Returns the freshest published snapshot.
    ///
    /// Subscriptions reconcile independently; a subscription that started
    /// later never rolls the answer back to an older point of the tail.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let active = self.active.read();
        let mut freshest = Arc::clone(&self.retired.read());
        for subscriber in active.values() {
            let snapshot = subscriber.snapshots.load();
            if snapshot.is_fresher_than(&freshest) {
                freshest = snapshot;
            }
        }
        freshest
    }

    /// Returns the primary antennas of the freshest snapshot.
    pub fn antennas(&self) -> ServerResult<Vec<AntennaUpdate>> {
        let snapshot = self.snapshot();
        snapshot
            .primary
            .values()
            .map(|entity| {
                AntennaUpdate::from_record(&entity.attributes, entity.performance_class)
                    .map_err(ServerError::from)
            })
            .collect()
    }

    /// Writes a synthetic low-performance sample for one antenna.
    ///
    /// The sample reaches subscribers through the tail like any other
    /// write. Ids absent from a non-empty current state are rejected.
    pub fn degrade(&self, request: DegradeRequest) -> ServerResult<PerformanceEvent> {
        let event = degrade_event(&request, &self.config, now_millis()?)?;

        let snapshot = self.snapshot();
        if !snapshot.is_empty() && !snapshot.contains(&event.antenna_id) {
            return Err(ServerError::UnknownEntity(event.antenna_id));
        }

        self.store.write(&event)?;
        info!(antenna_id = %event.antenna_id, "antenna degraded");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MemoryStore;
    use crate::sink::MemorySink;
    use std::time::Duration;
    use tailfeed_engine::MockCursorSource;
    use tailfeed_protocol::PerformanceClass;
    use tailfeed_testkit::TailScript;

    fn ended_source(script: TailScript) -> MockCursorSource {
        let source = MockCursorSource::new();
        source.push_rows(script.build()).end_when_drained();
        source
    }

    #[tokio::test]
    async fn subscription_updates_current_state() {
        let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
        assert!(service.antennas().unwrap().is_empty());

        let source = ended_source(TailScript::new().interval(&[("1", 6.0), ("2", 4.0)]));
        let handle = service.subscribe(source, MemorySink::new()).unwrap();
        let (summary, stats) = handle.join().await.unwrap();

        assert_eq!(summary.snapshots_published, 1);
        assert_eq!(stats.batches_published, 1);

        let antennas = service.antennas().unwrap();
        assert_eq!(antennas.len(), 2);
        assert_eq!(antennas[0].class, PerformanceClass::High);
        assert_eq!(service.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn degrade_writes_sample() {
        let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
        let source = ended_source(TailScript::new().interval(&[("1", 6.0)]));
        service
            .subscribe(source, MemorySink::new())
            .unwrap()
            .join()
            .await
            .unwrap();

        let event = service.degrade(DegradeRequest::new("1")).unwrap();
        assert_eq!(event.performance, 0.0);
        assert_eq!(service.store().len(), 1);

        assert!(matches!(
            service.degrade(DegradeRequest::new("99")),
            Err(ServerError::UnknownEntity(_))
        ));
    }

    #[test]
    fn degrade_before_any_snapshot_is_forwarded() {
        let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
        assert!(service.degrade(DegradeRequest::new("7")).is_ok());
    }

    #[test]
    fn degrade_store_failure() {
        let store = MemoryStore::new();
        store.fail_writes("connection refused");
        let service = AntennaService::new(SubscriptionConfig::default(), store);
        assert!(matches!(
            service.degrade(DegradeRequest::new("1")),
            Err(ServerError::Store(_))
        ));
    }

    #[tokio::test]
    async fn later_subscription_does_not_roll_back_state() {
        let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
        let advanced = ended_source(
            TailScript::new()
                .interval(&[("1", 6.0)])
                .interval(&[("1", 6.0)])
                .interval(&[("1", 6.0)]),
        );
        service.subscribe(advanced, MemorySink::new()).unwrap().join().await.unwrap();
        let before = service.snapshot();
        assert_eq!(before.progress, Some(3));

        let late = ended_source(TailScript::new().interval(&[("2", 4.0)]));
        service.subscribe(late, MemorySink::new()).unwrap().join().await.unwrap();

        assert_eq!(*service.snapshot(), *before);
        let ids: Vec<String> = service
            .antennas()
            .unwrap()
            .into_iter()
            .map(|antenna| antenna.antenna_id)
            .collect();
        assert_eq!(ids, vec!["1".to_string()]);
        assert!(matches!(
            service.degrade(DegradeRequest::new("2")),
            Err(ServerError::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn live_subscription_state_survives_a_newer_subscriber() {
        let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
        let live = MockCursorSource::new();
        live.push_rows(
            TailScript::new()
                .interval(&[("1", 6.0)])
                .interval(&[("1", 6.0), ("3", 4.0)])
                .interval(&[("1", 6.0), ("3", 4.0)])
                .build(),
        );
        let live_handle = service.subscribe(live, MemorySink::new()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while service.snapshot().progress != Some(3) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let late = ended_source(TailScript::new().interval(&[("2", 4.0)]));
        service.subscribe(late, MemorySink::new()).unwrap().join().await.unwrap();
        assert_eq!(service.snapshot().progress, Some(3));
        assert!(service.snapshot().contains("3"));
        assert!(!service.snapshot().contains("2"));

        live_handle.cancel();
        live_handle.join().await.unwrap();
        assert_eq!(service.active_subscriptions(), 0);
        assert_eq!(service.snapshot().progress, Some(3));
    }

    #[tokio::test]
    async fn cancel_all_stops_live_subscriptions() {
        let service = AntennaService::new(SubscriptionConfig::default(), MemoryStore::new());
        let sink = MemorySink::new();
        let handle = service.subscribe(MockCursorSource::new(), sink.clone()).unwrap();
        assert_eq!(service.active_subscriptions(), 1);

        service.cancel_all();
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .unwrap()
            .unwrap();
        assert!(sink.is_ended());
    }
}
