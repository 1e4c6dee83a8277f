//! Engine configuration.

use rowsync_core::{ClockConfig, DEFAULT_MAX_DRIFT_MS};

/// Configuration for a replication engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Name used in log output.
    pub name: String,
    /// Endpoint sync requests are posted to.
    pub sync_url: String,
    /// How far a timestamp may run ahead of the wall clock.
    pub max_drift_ms: u64,
    /// Maximum number of follow-up rounds in one sync.
    pub sync_loop_limit: u32,
    /// Capacity of the work queue.
    pub queue_capacity: usize,
    /// Capacity of the event channel.
    pub event_capacity: usize,
    /// Wipe the store when opening.
    pub reset_on_open: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "rowsync".to_string(),
            sync_url: "http://localhost:4000/sync".to_string(),
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            sync_loop_limit: 100,
            queue_capacity: 256,
            event_capacity: 256,
            reset_on_open: false,
        }
    }
}

impl EngineConfig {
    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            max_drift_ms: self.max_drift_ms,
        }
    }
}

/// Builder for engine configuration.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn sync_url(mut self, url: impl Into<String>) -> Self {
        self.config.sync_url = url.into();
        self
    }

    pub fn max_drift(mut self, ms: u64) -> Self {
        self.config.max_drift_ms = ms;
        self
    }

    pub fn sync_loop_limit(mut self, limit: u32) -> Self {
        self.config.sync_loop_limit = limit;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn reset_on_open(mut self, enabled: bool) -> Self {
        self.config.reset_on_open = enabled;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfigBuilder::new()
            .name("laptop")
            .sync_url("memory://")
            .max_drift(1_000)
            .sync_loop_limit(5)
            .queue_capacity(0)
            .reset_on_open(true)
            .build();

        assert_eq!(config.name, "laptop");
        assert_eq!(config.sync_url, "memory://");
        assert_eq!(config.clock_config().max_drift_ms, 1_000);
        assert_eq!(config.sync_loop_limit, 5);
        assert_eq!(config.queue_capacity, 1);
        assert!(config.reset_on_open);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sync_loop_limit, 100);
        assert_eq!(config.max_drift_ms, 5 * 60 * 1000);
        assert!(!config.reset_on_open);
    }
}
