//! Antenna payloads carried by change rows.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Health bucket of an antenna, derived from its performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceClass {
    /// Performing well.
    High,
    /// Between the low and high thresholds.
    Medium,
    /// Performing poorly.
    Low,
}

impl PerformanceClass {
    /// Returns the lowercase name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceClass::High => "high",
            PerformanceClass::Medium => "medium",
            PerformanceClass::Low => "low",
        }
    }
}

impl std::fmt::Display for PerformanceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GeoJSON point geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Geometry type, `"Point"` for antennas.
    #[serde(rename = "type")]
    pub kind: String,
    /// Longitude and latitude.
    pub coordinates: [f64; 2],
}

/// Properties of an antenna feature.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureProperties {
    /// Display name of the antenna.
    #[serde(default)]
    pub name: String,
}

/// A GeoJSON feature positioning an antenna.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFeature {
    /// Feature type.
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    /// Point geometry.
    pub geometry: GeoPoint,
    /// Feature properties.
    #[serde(default)]
    pub properties: FeatureProperties,
}

impl GeoFeature {
    /// Creates a point feature.
    pub fn point(name: impl Into<String>, longitude: f64, latitude: f64) -> Self {
        Self {
            kind: feature_kind(),
            geometry: GeoPoint {
                kind: "Point".into(),
                coordinates: [longitude, latitude],
            },
            properties: FeatureProperties { name: name.into() },
        }
    }
}

fn feature_kind() -> String {
    "Feature".into()
}

/// The decoded payload of an antenna change row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntennaRecord {
    /// Antenna identifier.
    #[serde(deserialize_with = "text_or_number")]
    pub antenna_id: String,
    /// Position of the antenna.
    #[serde(deserialize_with = "feature_or_encoded")]
    pub geojson: GeoFeature,
    /// Average performance over the view's window.
    #[serde(deserialize_with = "float_or_text")]
    pub performance: f64,
    /// Connected clients, when the view exposes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients_connected: Option<u32>,
    /// True for helper antennas.
    #[serde(default)]
    pub helper: bool,
}

impl AntennaRecord {
    /// Creates a primary antenna record.
    pub fn new(antenna_id: impl Into<String>, geojson: GeoFeature, performance: f64) -> Self {
        Self {
            antenna_id: antenna_id.into(),
            geojson,
            performance,
            clients_connected: None,
            helper: false,
        }
    }

    /// Marks the record as a helper antenna.
    pub fn as_helper(mut self) -> Self {
        self.helper = true;
        self
    }

    /// Decodes a row payload. `key` is only used for error reporting.
    pub fn decode(key: &str, payload: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(payload).map_err(|e| ProtocolError::payload(key, e))
    }

    /// Encodes the record as a row payload.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::payload(self.antenna_id.clone(), e))
    }
}

/// A performance sample written to the store.
///
/// This is the shape of every write the tailed view aggregates, including
/// the synthetic samples produced by the degrade mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEvent {
    /// Antenna the sample belongs to.
    pub antenna_id: String,
    /// Connected clients at sample time.
    pub clients_connected: u32,
    /// Measured performance.
    pub performance: f64,
    /// Sample time (Unix millis).
    pub updated_at: u64,
}

impl PerformanceEvent {
    /// Creates a sample.
    pub fn new(
        antenna_id: impl Into<String>,
        clients_connected: u32,
        performance: f64,
        updated_at: u64,
    ) -> Self {
        Self {
            antenna_id: antenna_id.into(),
            clients_connected,
            performance,
            updated_at,
        }
    }
}

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Key::deserialize(deserializer)? {
        Key::Text(text) => text,
        Key::Number(number) => number.to_string(),
    })
}

fn float_or_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Float {
        Number(f64),
        Text(String),
    }

    match Float::deserialize(deserializer)? {
        Float::Number(value) => Ok(value),
        Float::Text(text) => text.trim().parse().map_err(D::Error::custom),
    }
}

// The backend stringified GeoJSON before publishing it.
fn feature_or_encoded<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GeoFeature, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Feature(GeoFeature),
        Encoded(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Feature(feature) => Ok(feature),
        Repr::Encoded(text) => serde_json::from_str(&text).map_err(D::Error::custom),
    }
}
