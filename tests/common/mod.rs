//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod client;

use sensord_rs::event::EventQueue;
use sensord_rs::mock::{mock_stream_graph, register_mock_modules};
use sensord_rs::module::ModuleRegistry;
use sensord_rs::processor::Processor;
use sensord_rs::server::SensorServer;
use sensord_rs::situation::SituationMonitor;
use sensord_rs::types::{ClientId, SensorType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub use builders::ConfigBuilder;
pub use client::{CommandClient, EventClient};

/// Upper bound for any single reply or event in these tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `condition` until it holds or `test_timeout` elapses
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A server over the simulated modules, with its sockets in a private
/// temporary directory
pub struct TestServer {
    pub server: SensorServer,
    _dir: TempDir,
}

impl TestServer {
    pub fn start() -> Self {
        Self::with_config(ConfigBuilder::new())
    }

    pub fn with_config(builder: ConfigBuilder) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = builder.build(dir.path());

        let registry = ModuleRegistry::new();
        register_mock_modules(&registry).expect("mock modules register");
        let queue = EventQueue::new(config.events.queue_capacity);
        let streams = mock_stream_graph(&registry, &queue).expect("mock streams compose");

        let server = SensorServer::start(&config, registry, streams, queue, SituationMonitor::new())
            .expect("server starts");
        Self { server, _dir: dir }
    }

    pub fn command(&self) -> CommandClient {
        CommandClient::connect(self.server.command_socket())
    }

    /// Open the event channel for `client_id` and wait until it is stored
    pub fn events(&self, client_id: ClientId) -> EventClient {
        let client = EventClient::connect(self.server.event_socket(), client_id);
        assert!(wait_until(|| self.server.sessions().get_event_socket(client_id).is_some()));
        client
    }

    /// Head processor of the stream serving `sensor`
    pub fn processor(&self, sensor: SensorType) -> Arc<Processor> {
        self.server
            .streams()
            .lookup_sensor(sensor)
            .and_then(|stream| stream.processor().cloned())
            .expect("stream has a processor")
    }
}
