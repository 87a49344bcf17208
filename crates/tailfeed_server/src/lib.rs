//! # Tailfeed Server
//!
//! Antenna subscription service for tailfeed.
//!
//! This crate provides:
//! - Subscriptions: one tail pipeline per subscriber, snapshots to a sink
//! - CBOR frame sinks over channels
//! - Current-state query over the latest snapshot
//! - The degrade mutation, written through a store writer
//!
//! # Architecture
//!
//! ```text
//! CursorSource -> tail task -> bridge -> subscription task -> SnapshotSink
//!                                             |
//!                                  per-subscription SnapshotHandle
//!                                             |
//!                                  freshest snapshot -> antennas()
//! ```
//!
//! Mutations never touch the snapshot directly. They are written to the
//! store and come back through the tailed view.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod mutation;
mod service;
mod sink;
mod subscription;

pub use config::SubscriptionConfig;
pub use error::{ServerError, ServerResult};
pub use mutation::{degrade_event, now_millis, DegradeRequest, MemoryStore, StoreWriter};
pub use service::AntennaService;
pub use sink::{snapshot_frame, FrameSink, MemorySink, SinkLog, SnapshotSink};
pub use subscription::{consume, SubscriptionHandle, SubscriptionSummary};
