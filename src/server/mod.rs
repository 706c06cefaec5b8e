//! Sensor server runtime
//!
//! [`SensorServer`] owns everything that lives for the process: both
//! listening sockets, the dispatcher thread, the module registry and the
//! composed stream graph.
//! Command connections are served by [`connection::serve_connection`] on
//! their own threads; event-channel connections only run the handshake in
//! [`crate::event::accept_event_channel`] and are then owned by the session
//! registry.

pub mod connection;
pub mod handlers;
pub mod listener;

pub use connection::{serve_connection, ConnectionContext};
pub use handlers::handle_packet;
pub use listener::{bind_socket, AcceptLoop, ConnectionLimiter, ConnectionPermit};

use crate::config::{Catalog, ServerConfig};
use crate::error::{Result, ResultExt, SensordError};
use crate::event::{accept_event_channel, DispatchStats, Dispatcher, DispatcherThread, EventQueue};
use crate::module::ModuleRegistry;
use crate::session::SessionRegistry;
use crate::situation::SituationMonitor;
use crate::stream::StreamGraph;
use std::path::Path;
use std::sync::Arc;

/// State shared by every command connection
pub struct ServerState {
    pub sessions: Arc<SessionRegistry>,
    pub streams: Arc<StreamGraph>,
    pub dispatcher: Dispatcher,
    /// Largest accepted command payload
    pub max_payload_size: usize,
}

/// Load the sensor, filter and processor plugin catalogs named by `config`.
/// Returns the number of modules registered.
pub fn load_module_catalogs(config: &ServerConfig, registry: &ModuleRegistry) -> Result<usize> {
    let catalogs = [
        ("sensor", &config.catalog.sensors),
        ("filter", &config.catalog.filters),
        ("processor", &config.catalog.processors),
    ];
    let mut loaded = 0;
    for (kind, path) in catalogs {
        let Some(path) = path else {
            tracing::debug!("No {} catalog configured", kind);
            continue;
        };
        let catalog = Catalog::load(path).context(format!("Failed to load {} catalog", kind))?;
        let count = registry.load_catalog(&catalog);
        tracing::info!("{} {} modules loaded from {}", count, kind, path.display());
        loaded += count;
    }
    Ok(loaded)
}

/// Load the stream catalog named by `config`
pub fn load_stream_catalog(config: &ServerConfig) -> Result<Catalog> {
    let path = config
        .catalog
        .streams
        .as_deref()
        .ok_or_else(|| SensordError::Config("No stream catalog configured".to_string()))?;
    Catalog::load(path).context("Failed to load stream catalog")
}

/// A running server
pub struct SensorServer {
    state: Arc<ServerState>,
    registry: ModuleRegistry,
    situation: SituationMonitor,
    dispatcher: DispatcherThread,
    command: AcceptLoop,
    event: AcceptLoop,
    stopped: bool,
}

impl SensorServer {
    /// Bind both sockets and start serving `streams`.
    ///
    /// `registry` and `queue` must be the ones `streams` was composed from.
    /// The registry is released on shutdown.
    pub fn start(
        config: &ServerConfig,
        registry: ModuleRegistry,
        streams: StreamGraph,
        queue: EventQueue,
        situation: SituationMonitor,
    ) -> Result<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(
            queue,
            sessions.clone(),
            situation.clone(),
            config.events.stateful_event_types(),
        );

        situation.subscribe(|situation| tracing::info!("Situation changed to {}", situation));

        let state = Arc::new(ServerState {
            sessions: sessions.clone(),
            streams: Arc::new(streams),
            dispatcher: dispatcher.clone(),
            max_payload_size: config.server.max_payload_size,
        });

        let command_path = config.server.command_socket.clone();
        let event_path = config.server.event_socket.clone();
        let command_listener = bind_socket(&command_path)?;
        let event_listener = bind_socket(&event_path)?;

        let dispatcher = DispatcherThread::spawn(dispatcher)?;

        let command_state = state.clone();
        let command = AcceptLoop::spawn(
            "command",
            command_path,
            command_listener,
            ConnectionLimiter::new(config.server.max_connections),
            move |stream, _permit| serve_connection(&command_state, stream),
        )?;

        let event = AcceptLoop::spawn(
            "event",
            event_path,
            event_listener,
            ConnectionLimiter::new(config.server.max_connections),
            move |stream, _permit| {
                if let Err(e) = accept_event_channel(stream, &sessions) {
                    tracing::error!("Event channel handshake failed: {}", e);
                }
            },
        )?;

        tracing::info!(
            "Sensor server started with {} streams",
            state.streams.len()
        );
        Ok(Self {
            state,
            registry,
            situation,
            dispatcher,
            command,
            event,
            stopped: false,
        })
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.state.sessions
    }

    pub fn streams(&self) -> &StreamGraph {
        &self.state.streams
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }

    pub fn situation(&self) -> &SituationMonitor {
        &self.situation
    }

    pub fn command_socket(&self) -> &Path {
        self.command.path()
    }

    pub fn event_socket(&self) -> &Path {
        self.event.path()
    }

    /// Stop accepting, stop the dispatcher and every processor worker, and
    /// log the final counters
    pub fn shutdown(&mut self) -> DispatchStats {
        if self.stopped {
            return self.state.dispatcher.stats();
        }
        self.stopped = true;
        tracing::info!("Sensor server shutting down");

        self.command.stop();
        self.event.stop();
        let stats = self.dispatcher.stop();
        for stream in self.state.streams.streams() {
            for processor in stream.processors() {
                if let Some(worker) = processor.worker_stats() {
                    tracing::info!("{} still running: {:?}", processor.name(), worker);
                }
            }
        }
        self.state.streams.shutdown_all();
        let modules = self.registry.len();
        self.registry.clear();
        tracing::info!("Released {} registered modules", modules);

        let queue = self.state.dispatcher.queue().stats();
        tracing::info!(
            "Event queue: {} pushed, {} popped, {} dropped",
            queue.pushed,
            queue.popped,
            queue.dropped
        );
        tracing::info!(
            "Dispatcher: {} dispatched, {} delivered, {} failed",
            stats.dispatched,
            stats.delivered,
            stats.failed
        );
        stats
    }
}

impl Drop for SensorServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
