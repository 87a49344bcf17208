//! # Tailfeed Protocol
//!
//! Data types shared by every stage of the tail pipeline.
//!
//! This crate provides:
//! - `RawChangeRow` for rows delivered by a streaming cursor
//! - `ChangeBatch` for the rows of one progress interval
//! - `AntennaRecord` payload decoding (GeoJSON positions, performance)
//! - `SubscriptionFrame` wire frames and their CBOR codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod antenna;
mod batch;
mod error;
mod frame;
mod row;

pub use antenna::{
    AntennaRecord, FeatureProperties, GeoFeature, GeoPoint, PerformanceClass, PerformanceEvent,
};
pub use batch::ChangeBatch;
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{AntennaUpdate, SubscriptionFrame};
pub use row::{DiffSign, RawChangeRow, DIFF_COLUMN, KEY_COLUMN, PROGRESS_COLUMN, TIMESTAMP_COLUMN};
