//! Property-based test generators using proptest.
//!
//! Provides strategies for generating tail streams that keep the
//! invariants of the upstream view: timestamps never go backwards and
//! every interval ends with a progress marker.

use crate::fixtures::{antenna_retraction, antenna_row, helper_retraction, helper_row, progress};
use proptest::prelude::*;
use tailfeed_protocol::RawChangeRow;

/// Strategy for antenna ids drawn from a small pool, so keys repeat.
pub fn antenna_id_strategy() -> impl Strategy<Value = String> {
    (1u8..=8).prop_map(|n| n.to_string())
}

/// Strategy for performance values around the class thresholds.
pub fn performance_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(4.75),
        Just(5.0),
        (300u32..700).prop_map(|n| f64::from(n) / 100.0),
    ]
}

/// One change within an interval.
#[derive(Debug, Clone)]
pub enum AntennaChange {
    /// Primary antenna upsert.
    Upsert {
        /// Antenna id.
        id: String,
        /// Performance.
        performance: f64,
    },
    /// Primary antenna retraction.
    Retract {
        /// Antenna id.
        id: String,
        /// Performance.
        performance: f64,
    },
    /// Helper antenna upsert.
    HelperUpsert {
        /// Antenna id.
        id: String,
        /// Performance.
        performance: f64,
    },
    /// Helper antenna retraction.
    HelperRetract {
        /// Antenna id.
        id: String,
        /// Performance.
        performance: f64,
    },
}

impl AntennaChange {
    /// Converts the change into a row at `timestamp`.
    pub fn to_row(&self, timestamp: u64) -> RawChangeRow {
        match self {
            AntennaChange::Upsert { id, performance } => antenna_row(id, *performance, timestamp),
            AntennaChange::Retract { id, performance } => {
                antenna_retraction(id, *performance, timestamp)
            }
            AntennaChange::HelperUpsert { id, performance } => {
                helper_row(&format!("H{id}"), *performance, timestamp)
            }
            AntennaChange::HelperRetract { id, performance } => {
                helper_retraction(&format!("H{id}"), *performance, timestamp)
            }
        }
    }
}

/// Strategy for one change.
pub fn antenna_change_strategy() -> impl Strategy<Value = AntennaChange> {
    prop_oneof![
        4 => (antenna_id_strategy(), performance_strategy())
            .prop_map(|(id, performance)| AntennaChange::Upsert { id, performance }),
        1 => (antenna_id_strategy(), performance_strategy())
            .prop_map(|(id, performance)| AntennaChange::Retract { id, performance }),
        2 => (antenna_id_strategy(), performance_strategy())
            .prop_map(|(id, performance)| AntennaChange::HelperUpsert { id, performance }),
        2 => (antenna_id_strategy(), performance_strategy())
            .prop_map(|(id, performance)| AntennaChange::HelperRetract { id, performance }),
    ]
}

/// Strategy for a tail stream of up to `max_intervals` intervals.
///
/// Interval `n` carries timestamp `n` on all its rows and ends with a
/// progress marker at `n`.
pub fn tail_stream_strategy(max_intervals: usize) -> impl Strategy<Value = Vec<RawChangeRow>> {
    prop::collection::vec(
        prop::collection::vec(antenna_change_strategy(), 0..12),
        1..max_intervals.max(2),
    )
    .prop_map(|intervals| {
        let mut rows = Vec::new();
        for (i, changes) in intervals.iter().enumerate() {
            let ts = i as u64 + 1;
            rows.extend(changes.iter().map(|change| change.to_row(ts)));
            rows.push(progress(ts));
        }
        rows
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn streams_end_with_marker(rows in tail_stream_strategy(6)) {
            prop_assert!(rows.last().map_or(false, |row| row.is_progress_marker));
        }

        #[test]
        fn timestamps_never_go_backwards(rows in tail_stream_strategy(6)) {
            for pair in rows.windows(2) {
                prop_assert!(pair[0].logical_timestamp <= pair[1].logical_timestamp);
            }
        }

        #[test]
        fn performance_in_range(performance in performance_strategy()) {
            prop_assert!((3.0..7.0).contains(&performance));
        }
    }
}
