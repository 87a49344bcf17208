//! Subscription service configuration.

use tailfeed_engine::TailConfig;

/// Configuration for the antenna subscription service.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Configuration of each subscription's tail.
    pub tail: TailConfig,
    /// Frames buffered per subscriber before the sink waits.
    pub frame_buffer: usize,
    /// Performance written by the degrade mutation.
    pub degraded_performance: f64,
    /// Connected clients written by the degrade mutation.
    pub degraded_clients: u32,
}

impl SubscriptionConfig {
    /// Creates a configuration around a tail configuration.
    pub fn new(tail: TailConfig) -> Self {
        Self {
            tail,
            frame_buffer: 16,
            degraded_performance: 0.0,
            degraded_clients: 0,
        }
    }

    /// Sets the per-subscriber frame buffer.
    pub fn with_frame_buffer(mut self, frames: usize) -> Self {
        self.frame_buffer = frames;
        self
    }

    /// Sets the performance written by the degrade mutation.
    pub fn with_degraded_performance(mut self, performance: f64) -> Self {
        self.degraded_performance = performance;
        self
    }

    /// Sets the connected clients written by the degrade mutation.
    pub fn with_degraded_clients(mut self, clients: u32) -> Self {
        self.degraded_clients = clients;
        self
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self::new(TailConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SubscriptionConfig::default();
        assert_eq!(config.frame_buffer, 16);
        assert_eq!(config.degraded_performance, 0.0);
        assert_eq!(config.tail.helper_miss_threshold, 3);
    }

    #[test]
    fn config_builder() {
        let config = SubscriptionConfig::new(TailConfig::new("antennas"))
            .with_frame_buffer(4)
            .with_degraded_performance(1.5)
            .with_degraded_clients(100);

        assert_eq!(config.tail.view, "antennas");
        assert_eq!(config.frame_buffer, 4);
        assert_eq!(config.degraded_performance, 1.5);
        assert_eq!(config.degraded_clients, 100);
    }
}
