//! The tail pipeline: reader, coalescer and bridge producer.

use crate::bridge::{self, BatchConsumer, BatchProducer, BridgeCloser, Termination};
use crate::coalescer::BatchCoalescer;
use crate::config::TailConfig;
use crate::error::{TailError, TailResult};
use crate::reader::{BoundedRowQueue, CursorReader};
use crate::source::CursorSource;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tailfeed_protocol::ChangeBatch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// Cursor declared, not yet tailing.
    Idle,
    /// Rows are being pulled.
    Tailing,
    /// The upstream ended and every batch was handed off.
    Ended,
    /// A fetch failed.
    Failed,
    /// Cancelled, or the consumer went away.
    Cancelled,
}

impl TailState {
    /// Returns true while rows are being pulled.
    pub fn is_active(&self) -> bool {
        matches!(self, TailState::Tailing)
    }

    /// Returns true once the tail has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TailState::Ended | TailState::Failed | TailState::Cancelled
        )
    }

    fn can_transition_to(&self, to: TailState) -> bool {
        match (self, to) {
            (TailState::Idle, TailState::Tailing) => true,
            (TailState::Idle | TailState::Tailing, to) => to.is_terminal(),
            _ => false,
        }
    }
}

/// Statistics about one tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailStats {
    /// Rows fetched from the cursor.
    pub rows_fetched: u64,
    /// Rows handed to the coalescer.
    pub rows_delivered: u64,
    /// Fetches that returned no rows.
    pub empty_fetches: u64,
    /// Batches emitted by the coalescer.
    pub batches_emitted: u64,
    /// Batches handed to the bridge.
    pub batches_published: u64,
    /// Batches carrying no rows, never handed to the bridge.
    pub empty_batches: u64,
    /// Batches overwritten before the consumer took them.
    pub batches_overwritten: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More rows may follow.
    Continue,
    /// The upstream ended; the remainder was flushed.
    Ended,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<TailState>,
    stats: RwLock<TailStats>,
    cancelled: AtomicBool,
}

/// Observes and cancels a running tail.
#[derive(Debug, Clone)]
pub struct TailControl {
    shared: Arc<Shared>,
    closer: BridgeCloser,
}

impl TailControl {
    /// Requests cancellation.
    ///
    /// The consumer is woken immediately; the tail task stops after its
    /// current fetch returns and closes the cursor.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.closer.close(Termination::Cancelled);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Gets the current state.
    pub fn state(&self) -> TailState {
        *self.shared.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> TailStats {
        self.shared.stats.read().clone()
    }
}

/// Reader, coalescer and producer driven as one sequential pipeline.
pub struct TailPipeline<S: CursorSource> {
    config: TailConfig,
    reader: CursorReader<S>,
    coalescer: BatchCoalescer,
    queue: BoundedRowQueue,
    producer: BatchProducer,
    shared: Arc<Shared>,
}

impl<S: CursorSource> TailPipeline<S> {
    /// Opens a cursor over the configured view, feeding `producer`.
    pub fn open(source: S, config: TailConfig, producer: BatchProducer) -> TailResult<Self> {
        config.validate()?;
        let reader = CursorReader::open(source, &config)?;

        Ok(Self {
            queue: BoundedRowQueue::new(config.queue_capacity),
            config,
            reader,
            coalescer: BatchCoalescer::new(),
            producer,
            shared: Arc::new(Shared {
                state: RwLock::new(TailState::Idle),
                stats: RwLock::new(TailStats::default()),
                cancelled: AtomicBool::new(false),
            }),
        })
    }

    /// Returns a control handle for this pipeline.
    pub fn control(&self) -> TailControl {
        TailControl {
            shared: Arc::clone(&self.shared),
            closer: self.producer.closer(),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> TailState {
        *self.shared.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> TailStats {
        self.shared.stats.read().clone()
    }

    fn transition(&self, to: TailState) -> TailResult<()> {
        let mut state = self.shared.state.write();
        if !state.can_transition_to(to) {
            return Err(TailError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{to:?}"),
            });
        }
        *state = to;
        Ok(())
    }

    fn check_cancelled(&self) -> TailResult<()> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            Err(TailError::Cancelled)
        } else if self.producer.is_consumer_closed() {
            Err(TailError::BridgeTerminated)
        } else {
            Ok(())
        }
    }

    /// Pulls one round of rows through the coalescer.
    pub fn step(&mut self) -> TailResult<StepOutcome> {
        self.check_cancelled()?;

        let delivered = self
            .reader
            .pull(self.config.fetch_batch_size, &mut self.queue)?;
        while let Some(row) = self.queue.pop() {
            if let Some(batch) = self.coalescer.push(row) {
                self.publish(batch)?;
            }
        }

        {
            let mut stats = self.shared.stats.write();
            stats.rows_fetched = self.reader.rows_fetched();
            stats.empty_fetches = self.reader.empty_fetches();
            stats.rows_delivered += delivered as u64;
        }

        if self.reader.is_exhausted() {
            if let Some(rest) = self.coalescer.finish() {
                self.publish(rest)?;
            }
            return Ok(StepOutcome::Ended);
        }
        if delivered == 0 {
            std::thread::sleep(self.config.idle_backoff);
        }
        Ok(StepOutcome::Continue)
    }

    fn publish(&mut self, batch: ChangeBatch) -> TailResult<()> {
        self.shared.stats.write().batches_emitted += 1;
        if batch.is_empty() {
            self.shared.stats.write().empty_batches += 1;
            return Ok(());
        }

        debug!(progress = ?batch.progress(), rows = batch.len(), "publishing batch");
        self.producer.publish(batch)?;

        let mut stats = self.shared.stats.write();
        stats.batches_published += 1;
        stats.batches_overwritten = self.producer.overwritten();
        Ok(())
    }

    /// Tails until the upstream ends, fails or the tail is cancelled.
    ///
    /// The cursor is closed and the consumer woken in every case. Ending
    /// and cancellation return the final stats; a failed fetch returns
    /// its error.
    pub fn run(mut self) -> TailResult<TailStats> {
        self.transition(TailState::Tailing)?;
        info!(cursor = %self.reader.session().cursor(), view = %self.config.view, "tail started");

        let result = loop {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Ended) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.reader.close() {
            warn!(error = %e, "failed to close tail cursor");
        }

        match result {
            Ok(()) => {
                self.transition(TailState::Ended)?;
                self.producer.terminate(Termination::Ended);
                info!("tail ended");
                Ok(self.stats())
            }
            Err(e) if e.is_end_of_stream() => {
                self.transition(TailState::Cancelled)?;
                self.producer.terminate(Termination::Cancelled);
                info!("tail cancelled");
                Ok(self.stats())
            }
            Err(e) => {
                warn!(error = %e, "tail failed");
                self.shared.stats.write().last_error = Some(e.to_string());
                self.transition(TailState::Failed)?;
                self.producer.terminate(Termination::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

/// A tail running on the blocking thread pool.
pub struct TailHandle {
    /// Receives the batches of the tail.
    pub consumer: BatchConsumer,
    /// Observes and cancels the tail.
    pub control: TailControl,
    /// The tail task.
    pub task: JoinHandle<TailResult<TailStats>>,
}

/// Opens a cursor over `config.view` and tails it in the background.
///
/// Must be called from within a Tokio runtime. The cursor is declared
/// before returning, so a bad view fails here rather than in the task.
pub fn spawn_tail<S>(source: S, config: TailConfig) -> TailResult<TailHandle>
where
    S: CursorSource + 'static,
{
    let (producer, consumer) = bridge::channel();
    let pipeline = TailPipeline::open(source, config, producer)?;
    let control = pipeline.control();
    let task = tokio::task::spawn_blocking(move || pipeline.run());

    Ok(TailHandle {
        consumer,
        control,
        task,
    })
}
