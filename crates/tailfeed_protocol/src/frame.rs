//! Wire frames sent to subscribers.

use crate::antenna::{AntennaRecord, PerformanceClass};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// One antenna as seen by a subscriber.
///
/// The GeoJSON feature travels as a JSON string, which is what map
/// clients feed straight into their sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntennaUpdate {
    /// Antenna identifier.
    pub antenna_id: String,
    /// JSON-encoded GeoJSON feature.
    pub geojson: String,
    /// Current performance.
    pub performance: f64,
    /// Health bucket.
    pub class: PerformanceClass,
}

impl AntennaUpdate {
    /// Builds an update from a decoded record and its class.
    pub fn from_record(record: &AntennaRecord, class: PerformanceClass) -> ProtocolResult<Self> {
        let geojson = serde_json::to_string(&record.geojson)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self {
            antenna_id: record.antenna_id.clone(),
            geojson,
            performance: record.performance,
            class,
        })
    }
}

/// A frame on a subscription stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionFrame {
    /// The complete current state after one applied batch.
    Snapshot {
        /// Snapshot version, increasing by one per applied batch.
        version: u64,
        /// Primary antennas.
        antennas: Vec<AntennaUpdate>,
        /// Helper antennas.
        helpers: Vec<AntennaUpdate>,
    },
    /// The stream ended; no further frames follow.
    End {
        /// Why the upstream ended, if it failed.
        reason: Option<String>,
    },
}

impl SubscriptionFrame {
    /// Returns the frame type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SubscriptionFrame::Snapshot { .. } => 1,
            SubscriptionFrame::End { .. } => 2,
        }
    }

    /// Returns true for the terminal frame.
    pub fn is_end(&self) -> bool {
        matches!(self, SubscriptionFrame::End { .. })
    }

    /// Encodes the frame to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes a frame from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
