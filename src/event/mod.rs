//! Event delivery pipeline
//!
//! Processor workers push into the bounded [`EventQueue`]; the single
//! [`Dispatcher`] thread pops, stamps and fans events out to the clients'
//! event channels ([`EventSocket`]), which are opened through the handshake
//! in [`channel`].

pub mod channel;
pub mod dispatcher;
pub mod queue;
pub mod socket;

pub use channel::accept_event_channel;
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherThread};
pub use queue::{EventItem, EventQueue, QueueStats};
pub use socket::EventSocket;
