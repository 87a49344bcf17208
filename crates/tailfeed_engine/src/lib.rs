//! # Tailfeed Engine
//!
//! Change-feed tail pipeline for live antenna views.
//!
//! This crate provides:
//! - Cursor source abstraction and cursor sessions
//! - Backpressure-aware cursor reader
//! - Batch coalescing per progress interval
//! - Single-slot push/pull bridge
//! - State reconciliation with tombstone debounce for helper entities
//!
//! ## Architecture
//!
//! ```text
//! CursorReader -> BatchCoalescer -> PushPullBridge -> StateReconciler -> snapshots
//! ```
//!
//! Reader and coalescer run on the tail task. The bridge is the only point
//! where the tail task and the consumer run concurrently; it holds at most
//! the latest batch.
//!
//! ## Key Invariants
//!
//! - A refused row stays buffered; no row is lost to backpressure
//! - One batch per progress marker, latest row per key
//! - Readers only see published, immutable snapshots
//! - Termination always wakes a waiting consumer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bridge;
mod coalescer;
mod config;
mod debounce;
mod error;
mod pipeline;
mod reader;
mod reconciler;
mod source;

pub use bridge::{channel, BatchConsumer, BatchProducer, BridgeCloser, Termination};
pub use coalescer::BatchCoalescer;
pub use config::{ClassThresholds, TailConfig, DEFAULT_VIEW};
pub use debounce::{DebounceVerdict, TombstoneDebounce};
pub use error::{TailError, TailResult};
pub use pipeline::{spawn_tail, StepOutcome, TailControl, TailHandle, TailPipeline, TailState, TailStats};
pub use reader::{BoundedRowQueue, CursorReader, ReaderState, RowSink};
pub use reconciler::{
    EntityState, HelperEntityState, ReconcileStats, Snapshot, SnapshotHandle, StateReconciler,
};
pub use source::{CursorSession, CursorSource, MockCursorSource, MockFetch};
