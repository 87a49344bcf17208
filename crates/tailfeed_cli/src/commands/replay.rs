//! Replay command implementation.

use crate::recording::{Recording, RecordingSource};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tailfeed_engine::{ClassThresholds, Snapshot, TailConfig};
use tailfeed_protocol::PerformanceClass;
use tailfeed_server::{
    AntennaService, MemoryStore, ServerResult, SnapshotSink, SubscriptionConfig,
};

/// Options of the replay command.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// View name reported in the tail statement.
    pub view: String,
    /// Strictly above this performance is high.
    pub high_above: f64,
    /// Strictly below this performance is low.
    pub low_below: f64,
    /// Matching retractions before a helper is evicted.
    pub helper_misses: u32,
    /// Output format (text, json).
    pub format: String,
}

impl ReplayOptions {
    fn tail_config(&self) -> TailConfig {
        TailConfig::new(&self.view)
            .with_thresholds(ClassThresholds::new(self.high_above, self.low_below))
            .with_helper_miss_threshold(self.helper_misses)
    }
}

/// One antenna of a printed snapshot.
#[derive(Debug, Serialize)]
pub struct AntennaLine {
    /// Antenna id.
    pub antenna_id: String,
    /// Display name.
    pub name: String,
    /// Performance.
    pub performance: f64,
    /// Health bucket.
    pub class: PerformanceClass,
    /// Pending misses, for helpers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub misses: Option<u32>,
}

/// A printed snapshot.
#[derive(Debug, Serialize)]
pub struct SnapshotReport {
    /// Snapshot version.
    pub version: u64,
    /// Progress timestamp of the last applied batch.
    pub progress: Option<u64>,
    /// Primary antennas.
    pub antennas: Vec<AntennaLine>,
    /// Helper antennas.
    pub helpers: Vec<AntennaLine>,
}

impl SnapshotReport {
    /// Builds the report of a snapshot.
    pub fn new(snapshot: &Snapshot) -> Self {
        Self {
            version: snapshot.version,
            progress: snapshot.progress,
            antennas: snapshot
                .primary
                .values()
                .map(|entity| AntennaLine {
                    antenna_id: entity.key.clone(),
                    name: entity.attributes.geojson.properties.name.clone(),
                    performance: entity.performance(),
                    class: entity.performance_class,
                    misses: None,
                })
                .collect(),
            helpers: snapshot
                .helpers
                .values()
                .map(|helper| AntennaLine {
                    antenna_id: helper.entity.key.clone(),
                    name: helper.entity.attributes.geojson.properties.name.clone(),
                    performance: helper.entity.performance(),
                    class: helper.entity.performance_class,
                    misses: Some(helper.miss_count),
                })
                .collect(),
        }
    }
}

/// Prints each snapshot to stdout.
struct PrintSink {
    json: bool,
}

impl SnapshotSink for PrintSink {
    async fn publish(&mut self, snapshot: Arc<Snapshot>) -> ServerResult<()> {
        let report = SnapshotReport::new(&snapshot);
        if self.json {
            let line = serde_json::to_string(&report)
                .map_err(|e| tailfeed_server::ServerError::Internal(e.to_string()))?;
            println!("{line}");
        } else {
            print_text(&report);
        }
        Ok(())
    }

    async fn end(&mut self, reason: Option<String>) -> ServerResult<()> {
        if !self.json {
            match reason {
                Some(reason) => println!("tail failed: {reason}"),
                None => println!("tail ended"),
            }
        }
        Ok(())
    }
}

/// Runs the replay command.
pub async fn run(path: &Path, options: &ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.tail_config();
    config.validate()?;

    let recording = Recording::read(path)?;
    let service = AntennaService::new(SubscriptionConfig::new(config), MemoryStore::new());
    let sink = PrintSink {
        json: options.format == "json",
    };

    let handle = service.subscribe(RecordingSource::new(recording.rows), sink)?;
    let (summary, stats) = handle.join().await?;

    tracing::info!(
        rows = stats.rows_fetched,
        batches = stats.batches_published,
        overwritten = stats.batches_overwritten,
        snapshots = summary.snapshots_published,
        skipped_lines = recording.skipped,
        "replay finished"
    );

    if let Some(reason) = summary.reason {
        return Err(format!("replay failed: {reason}").into());
    }
    Ok(())
}

fn print_text(report: &SnapshotReport) {
    println!(
        "Snapshot v{} (progress {})",
        report.version,
        report
            .progress
            .map_or_else(|| "-".to_string(), |p| p.to_string())
    );
    for class in [
        PerformanceClass::High,
        PerformanceClass::Medium,
        PerformanceClass::Low,
    ] {
        let names: Vec<&str> = report
            .antennas
            .iter()
            .filter(|antenna| antenna.class == class)
            .map(|antenna| antenna.antenna_id.as_str())
            .collect();
        println!("  {:<7} {}", class.as_str(), names.join(", "));
    }
    if !report.helpers.is_empty() {
        println!("  helpers:");
        for helper in &report.helpers {
            println!(
                "    {} {:.2} ({} misses)",
                helper.antenna_id,
                helper.performance,
                helper.misses.unwrap_or(0)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailfeed_engine::StateReconciler;
    use tailfeed_protocol::ChangeBatch;
    use tailfeed_testkit::{antenna_row, helper_row, TailScript};

    fn options() -> ReplayOptions {
        ReplayOptions {
            view: "antennas".into(),
            high_above: 5.0,
            low_below: 4.75,
            helper_misses: 3,
            format: "json".into(),
        }
    }

    #[test]
    fn report_lists_both_tables() {
        let mut reconciler = StateReconciler::new(&options().tail_config());
        let snapshot = reconciler
            .apply(&ChangeBatch::new(
                vec![antenna_row("1", 6.0, 1), helper_row("H1", 5.0, 1)],
                1,
            ))
            .unwrap();

        let report = SnapshotReport::new(&snapshot);
        assert_eq!(report.antennas[0].class, PerformanceClass::High);
        assert_eq!(report.antennas[0].name, "Antenna 1");
        assert_eq!(report.helpers[0].misses, Some(0));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["antennas"][0]["class"], "high");
        assert!(json["antennas"][0].get("misses").is_none());
    }

    #[test]
    fn thresholds_come_from_options() {
        let mut opts = options();
        opts.high_above = 7.0;
        let config = opts.tail_config();
        assert_eq!(config.thresholds.classify(6.0), PerformanceClass::Medium);
        assert_eq!(config.tail_statement(), "TAIL antennas WITH (PROGRESS)");
    }

    #[tokio::test]
    async fn replays_a_recording() {
        let file = tailfeed_testkit::Recording::write(
            &TailScript::new()
                .interval(&[("1", 6.0), ("2", 4.0)])
                .interval(&[("1", 4.0)])
                .build(),
        );
        run(file.path(), &options()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_thresholds_are_rejected() {
        let file = tailfeed_testkit::Recording::write(&TailScript::new().interval(&[("1", 6.0)]).build());
        let mut opts = options();
        opts.low_below = 9.0;
        assert!(run(file.path(), &opts).await.is_err());
    }
}
