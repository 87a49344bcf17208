//! Single-slot handoff between the tail task and one consumer.
//!
//! The producer never waits: publishing overwrites whatever batch the
//! consumer has not taken yet. The consumer always sees the most recent
//! batch, and a terminated producer always wakes it.

use crate::error::{TailError, TailResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tailfeed_protocol::ChangeBatch;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Why the producer side stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The upstream ended normally.
    Ended,
    /// The upstream failed.
    Failed(String),
    /// The tail was cancelled.
    Cancelled,
}

impl Termination {
    /// Returns the failure message, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Termination::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<ChangeBatch>,
    terminal: Option<Termination>,
    consumer_gone: bool,
    published: u64,
    overwritten: u64,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Shared {
    fn terminate(&self, termination: Termination) {
        {
            let mut slot = self.slot.lock();
            if slot.terminal.is_some() {
                return;
            }
            debug!(?termination, "bridge terminated");
            slot.terminal = Some(termination);
        }
        self.notify.notify_one();
    }
}

/// Creates a connected producer / consumer pair.
pub fn channel() -> (BatchProducer, BatchConsumer) {
    let shared = Arc::new(Shared::default());
    (
        BatchProducer {
            shared: Arc::clone(&shared),
        },
        BatchConsumer { shared },
    )
}

/// Producer half of the bridge. Dropping it ends the stream.
#[derive(Debug)]
pub struct BatchProducer {
    shared: Arc<Shared>,
}

impl BatchProducer {
    /// Stores `batch` as the latest batch and wakes the consumer.
    ///
    /// An unconsumed previous batch is discarded. Fails with
    /// [`TailError::BridgeTerminated`] once the consumer is gone or the
    /// bridge was terminated.
    pub fn publish(&self, batch: ChangeBatch) -> TailResult<()> {
        {
            let mut slot = self.shared.slot.lock();
            if slot.consumer_gone || slot.terminal.is_some() {
                return Err(TailError::BridgeTerminated);
            }
            if slot.latest.is_some() {
                slot.overwritten += 1;
                trace!(overwritten = slot.overwritten, "unconsumed batch overwritten");
            }
            slot.latest = Some(batch);
            slot.published += 1;
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Ends the stream. Only the first termination is kept.
    pub fn terminate(&self, termination: Termination) {
        self.shared.terminate(termination);
    }

    /// Returns true once the consumer has been dropped.
    pub fn is_consumer_closed(&self) -> bool {
        self.shared.slot.lock().consumer_gone
    }

    /// Returns a handle that can terminate the bridge from elsewhere.
    pub fn closer(&self) -> BridgeCloser {
        BridgeCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the number of batches published.
    pub fn published(&self) -> u64 {
        self.shared.slot.lock().published
    }

    /// Returns the number of batches discarded before being consumed.
    pub fn overwritten(&self) -> u64 {
        self.shared.slot.lock().overwritten
    }
}

impl Drop for BatchProducer {
    fn drop(&mut self) {
        self.shared.terminate(Termination::Ended);
    }
}

/// Terminates a bridge without owning its producer.
#[derive(Debug, Clone)]
pub struct BridgeCloser {
    shared: Arc<Shared>,
}

impl BridgeCloser {
    /// Terminates the bridge, waking the consumer.
    pub fn close(&self, termination: Termination) {
        self.shared.terminate(termination);
    }
}

/// Consumer half of the bridge.
#[derive(Debug)]
pub struct BatchConsumer {
    shared: Arc<Shared>,
}

impl BatchConsumer {
    /// Waits for the next batch.
    ///
    /// A batch published before termination is still delivered. After
    /// that, returns [`TailError::BridgeTerminated`].
    pub async fn recv(&self) -> TailResult<ChangeBatch> {
        loop {
            {
                let mut slot = self.shared.slot.lock();
                if let Some(batch) = slot.latest.take() {
                    return Ok(batch);
                }
                if slot.terminal.is_some() {
                    // Keep the wakeup for any later recv call.
                    self.shared.notify.notify_one();
                    return Err(TailError::BridgeTerminated);
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Takes the latest batch without waiting.
    pub fn try_recv(&self) -> Option<ChangeBatch> {
        self.shared.slot.lock().latest.take()
    }

    /// Returns how the producer stopped, if it has.
    pub fn termination(&self) -> Option<Termination> {
        self.shared.slot.lock().terminal.clone()
    }
}

impl Drop for BatchConsumer {
    fn drop(&mut self) {
        self.shared.slot.lock().consumer_gone = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tailfeed_protocol::RawChangeRow;

    fn batch(progress: u64) -> ChangeBatch {
        ChangeBatch::new(vec![RawChangeRow::upsert("1", "{}", progress)], progress)
    }

    #[tokio::test]
    async fn delivers_published_batch() {
        let (producer, consumer) = channel();
        producer.publish(batch(1)).unwrap();
        assert_eq!(consumer.recv().await.unwrap().progress(), Some(1));
    }

    #[tokio::test]
    async fn slow_consumer_sees_latest_batch() {
        let (producer, consumer) = channel();
        producer.publish(batch(1)).unwrap();
        producer.publish(batch(2)).unwrap();
        producer.publish(batch(3)).unwrap();

        assert_eq!(consumer.recv().await.unwrap().progress(), Some(3));
        assert_eq!(producer.overwritten(), 2);
        assert_eq!(producer.published(), 3);
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken() {
        let (producer, consumer) = channel();
        let task = tokio::spawn(async move { consumer.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.publish(batch(7)).unwrap();

        let received = task.await.unwrap().unwrap();
        assert_eq!(received.progress(), Some(7));
    }

    #[tokio::test]
    async fn termination_wakes_waiting_consumer() {
        let (producer, consumer) = channel();
        let task = tokio::spawn(async move {
            let result = consumer.recv().await;
            (result, consumer.termination())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.terminate(Termination::Failed("connection reset".into()));

        let (result, termination) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TailError::BridgeTerminated)));
        assert_eq!(termination, Some(Termination::Failed("connection reset".into())));
    }

    #[tokio::test]
    async fn pending_batch_survives_termination() {
        let (producer, consumer) = channel();
        producer.publish(batch(1)).unwrap();
        drop(producer);

        assert_eq!(consumer.recv().await.unwrap().progress(), Some(1));
        assert!(matches!(consumer.recv().await, Err(TailError::BridgeTerminated)));
        assert!(matches!(consumer.recv().await, Err(TailError::BridgeTerminated)));
        assert_eq!(consumer.termination(), Some(Termination::Ended));
    }

    #[tokio::test]
    async fn first_termination_wins() {
        let (producer, consumer) = channel();
        producer.closer().close(Termination::Cancelled);
        producer.terminate(Termination::Failed("late".into()));
        drop(producer);

        assert_eq!(consumer.termination(), Some(Termination::Cancelled));
    }

    #[test]
    fn publish_after_consumer_dropped() {
        let (producer, consumer) = channel();
        drop(consumer);
        assert!(producer.is_consumer_closed());
        assert!(matches!(
            producer.publish(batch(1)),
            Err(TailError::BridgeTerminated)
        ));
    }

    #[test]
    fn try_recv_clears_slot() {
        let (producer, consumer) = channel();
        assert!(consumer.try_recv().is_none());
        producer.publish(batch(1)).unwrap();
        assert!(consumer.try_recv().is_some());
        assert!(consumer.try_recv().is_none());
    }
}
