//! Configuration for the tail engine.

use crate::error::{TailError, TailResult};
use std::time::Duration;
use tailfeed_protocol::PerformanceClass;

/// View tailed when none is configured.
pub const DEFAULT_VIEW: &str = "last_half_minute_performance_per_antenna";

/// Configuration for one tail pipeline.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Materialized view to tail.
    pub view: String,
    /// Rows requested per fetch.
    pub fetch_batch_size: usize,
    /// Maximum time a fetch waits for rows.
    pub fetch_timeout: Duration,
    /// Capacity of the row queue between the reader and the coalescer.
    pub queue_capacity: usize,
    /// Pause after a fetch that returned no rows.
    pub idle_backoff: Duration,
    /// Matching retractions needed before a helper entity is evicted.
    pub helper_miss_threshold: u32,
    /// Performance classification thresholds.
    pub thresholds: ClassThresholds,
}

impl TailConfig {
    /// Creates a configuration tailing `view`.
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            fetch_batch_size: 1000,
            fetch_timeout: Duration::from_secs(1),
            queue_capacity: 100,
            idle_backoff: Duration::from_millis(10),
            helper_miss_threshold: 3,
            thresholds: ClassThresholds::default(),
        }
    }

    /// Sets the fetch batch size.
    pub fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size;
        self
    }

    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the row queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the pause after an empty fetch.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Sets the helper eviction threshold.
    pub fn with_helper_miss_threshold(mut self, threshold: u32) -> Self {
        self.helper_miss_threshold = threshold;
        self
    }

    /// Sets the classification thresholds.
    pub fn with_thresholds(mut self, thresholds: ClassThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Returns the statement declaring the streaming cursor.
    pub fn tail_statement(&self) -> String {
        format!("TAIL {} WITH (PROGRESS)", self.view)
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> TailResult<()> {
        if self.view.trim().is_empty() {
            return Err(TailError::InvalidConfig("view name is empty".into()));
        }
        if self.fetch_batch_size == 0 {
            return Err(TailError::InvalidConfig("fetch batch size must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(TailError::InvalidConfig("queue capacity must be positive".into()));
        }
        if self.helper_miss_threshold == 0 {
            return Err(TailError::InvalidConfig("helper miss threshold must be positive".into()));
        }
        if self.thresholds.low_below > self.thresholds.high_above {
            return Err(TailError::InvalidConfig(format!(
                "low threshold {} is above high threshold {}",
                self.thresholds.low_below, self.thresholds.high_above
            )));
        }
        Ok(())
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self::new(DEFAULT_VIEW)
    }
}

/// Thresholds splitting performance into high / medium / low.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassThresholds {
    /// Strictly above this value is high.
    pub high_above: f64,
    /// Strictly below this value is low.
    pub low_below: f64,
}

impl ClassThresholds {
    /// Creates thresholds.
    pub fn new(high_above: f64, low_below: f64) -> Self {
        Self {
            high_above,
            low_below,
        }
    }

    /// Classifies a performance value.
    pub fn classify(&self, performance: f64) -> PerformanceClass {
        if performance > self.high_above {
            PerformanceClass::High
        } else if performance < self.low_below {
            PerformanceClass::Low
        } else {
            PerformanceClass::Medium
        }
    }
}

impl Default for ClassThresholds {
    fn default() -> Self {
        Self::new(5.0, 4.75)
    }
}
