//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of records scanned per pull.
    pub max_pull_batch: u32,
    /// Maximum number of changes accepted per push request.
    pub max_push_batch: u32,
    /// Whether a pull skips records last written by the requesting device.
    pub skip_own_changes: bool,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 500,
            max_push_batch: 100,
            skip_own_changes: true,
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets whether pulls echo a device's own writes back to it.
    pub fn with_skip_own_changes(mut self, skip: bool) -> Self {
        self.skip_own_changes = skip;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_push_batch, 100);
        assert!(config.skip_own_changes);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_pull_batch(50)
            .with_max_push_batch(10)
            .with_skip_own_changes(false);

        assert_eq!(config.max_pull_batch, 50);
        assert_eq!(config.max_push_batch, 10);
        assert!(!config.skip_own_changes);
    }
}
