//! # sensord-rs: Out-of-process Sensor Broker
//!
//! A daemon multiplexing physical and fused sensors to many client processes
//! over two local Unix-domain sockets. Clients subscribe to typed events and
//! negotiate sampling rates; the broker keeps hardware active only while at
//! least one client needs it and fans every produced event out to the
//! clients subscribed to it.
//!
//! ## Architecture
//!
//! - **Modules**: sensor, filter and processor plugins loaded through
//!   libloading (or registered as built-ins) into a [`module::ModuleRegistry`]
//! - **Streams**: named sensor → filter → processor pipelines composed from a
//!   catalog at startup ([`stream::StreamGraph`])
//! - **Processors**: per-instance start refcount, event client counts,
//!   polling-interval arbitration and a polling worker thread
//! - **Command channel**: thread-per-connection request/reply server
//!   ([`server`]) over the wire codecs in [`protocol`]
//! - **Event channel**: a bounded crossbeam queue drained by a single
//!   dispatcher thread that pushes to each subscriber's socket ([`event`])
//!
//! ## Configuration
//!
//! The server reads one TOML file ([`config::ServerConfig`]) naming the
//! socket paths, queue bounds and the module and stream catalogs.
//!
//! ## Example
//!
//! ```ignore
//! use sensord_rs::{
//!     config::ServerConfig,
//!     event::EventQueue,
//!     module::ModuleRegistry,
//!     server::{self, SensorServer},
//!     situation::SituationMonitor,
//!     stream::StreamGraph,
//! };
//!
//! let config = ServerConfig::load_or_default(Some("sensord.toml".as_ref()))?;
//! let registry = ModuleRegistry::new();
//! server::load_module_catalogs(&config, &registry)?;
//!
//! let queue = EventQueue::new(config.events.queue_capacity);
//! let streams = StreamGraph::build(&server::load_stream_catalog(&config)?, &registry, &queue);
//! let server = SensorServer::start(&config, registry, streams, queue, SituationMonitor::new())?;
//! ```

pub mod config;
pub mod error;
pub mod event;
#[cfg(feature = "mock-sensor")]
pub mod mock;
pub mod module;
pub mod processor;
pub mod protocol;
pub mod server;
pub mod session;
pub mod situation;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use config::{Catalog, ServerConfig};
pub use error::{Result, SensordError};
pub use event::{Dispatcher, EventQueue};
pub use module::{Module, ModuleRegistry};
pub use processor::Processor;
pub use server::SensorServer;
pub use session::SessionRegistry;
pub use situation::SituationMonitor;
pub use stream::StreamGraph;
pub use types::{ClientId, EventType, SensorType, Situation};
