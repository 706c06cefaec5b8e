//! Test data builders for creating test objects

use sensord_rs::config::ServerConfig;
use std::path::Path;

/// Builder for server configurations rooted in a temporary directory
pub struct ConfigBuilder {
    queue_capacity: usize,
    max_connections: usize,
    stateful_events: Option<Vec<u32>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            queue_capacity: 256,
            max_connections: 16,
            stateful_events: None,
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn stateful_events(mut self, events: Vec<u32>) -> Self {
        self.stateful_events = Some(events);
        self
    }

    /// Configuration with both sockets placed in `dir`
    pub fn build(self, dir: &Path) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.server.command_socket = dir.join("command.sock");
        config.server.event_socket = dir.join("event.sock");
        config.server.max_connections = self.max_connections;
        config.events.queue_capacity = self.queue_capacity;
        if let Some(events) = self.stateful_events {
            config.events.stateful_events = events;
        }
        config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .queue_capacity(8)
            .max_connections(2)
            .build(Path::new("/tmp/x"));

        assert_eq!(config.events.queue_capacity, 8);
        assert_eq!(config.server.max_connections, 2);
        assert_eq!(config.server.command_socket, Path::new("/tmp/x/command.sock"));
        assert!(config.validate().is_ok());
    }
}
