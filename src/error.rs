//! Error handling for sensord-rs
//!
//! This module defines the error taxonomy shared by every subsystem and a
//! Result alias. Each variant maps to one failure policy:
//!
//! - [`SensordError::Load`] - a plugin is unusable, the process continues
//! - [`SensordError::Composition`] - a stream input is skipped or a stream dropped
//! - [`SensordError::Protocol`] - the offending connection is torn down
//! - [`SensordError::Session`] / [`SensordError::Hardware`] - reported to the
//!   client as an error status, the connection stays open
//! - [`SensordError::QueueOverflow`] - the event is dropped and logged
//! - [`SensordError::Channel`] - the event queue is gone or a thread could not start

use thiserror::Error;

/// Wire status for a successful command
pub const OP_SUCCESS: i64 = 0;

/// Wire status for a failed command
pub const OP_ERROR: i64 = -1;

/// Main error type for sensord-rs operations
#[derive(Error, Debug)]
pub enum SensordError {
    /// Plugin load or symbol resolution failure
    #[error("Load error: {0}")]
    Load(String),

    /// A stream definition could not be (fully) composed
    #[error("Composition error: {0}")]
    Composition(String),

    /// Malformed header, oversized payload or failed read
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unknown client id or event type not in the expected registration state
    #[error("Session error: {0}")]
    Session(String),

    /// A processor or sensor call failed
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// The event queue is full and the event was dropped
    #[error("Event queue full (capacity {capacity})")]
    QueueOverflow { capacity: usize },

    /// Errors related to configuration and catalog loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SensordError>,
    },
}

impl SensordError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SensordError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with context layers peeled off
    pub fn root(&self) -> &SensordError {
        match self {
            SensordError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error must tear down the connection it occurred on
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self.root(), SensordError::Protocol(_) | SensordError::Io(_))
    }

    /// Status code reported to the client for this error
    pub fn status(&self) -> i64 {
        OP_ERROR
    }
}

/// Result type alias for sensord-rs operations
pub type Result<T> = std::result::Result<T, SensordError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SensordError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SensordError::Io(e).with_context(f()))
    }
}
