//! Command connection worker
//!
//! One thread serves one command-channel connection for its whole life:
//! read a packet, run its handler, write exactly one reply, repeat. The
//! loop ends on end-of-stream, on a socket or protocol error, or after
//! BYEBYE. Whatever the connection left behind is then released by
//! [`cleanup`].

use super::handlers::handle_packet;
use super::ServerState;
use crate::processor::IntervalKind;
use crate::protocol::{read_packet, write_packet};
use crate::stream::DataStream;
use crate::types::{ClientId, EventType, SensorType, CLIENT_ID_INVALID};
use std::collections::BTreeSet;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

/// Per-connection state
#[derive(Debug)]
pub struct ConnectionContext {
    /// Client this connection acts for, once known
    pub client_id: ClientId,
    /// Stream bound by HELLO
    pub stream: Option<Arc<DataStream>>,
    /// Sensor bound by HELLO
    pub sensor: Option<SensorType>,
    /// Whether this connection holds a START on the stream's processor
    pub started: bool,
    /// Event types registered through this connection
    pub registered: BTreeSet<EventType>,
    /// Set by BYEBYE; the loop stops after replying
    pub finished: bool,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID_INVALID,
            stream: None,
            sensor: None,
            started: false,
            registered: BTreeSet::new(),
            finished: false,
        }
    }
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_client(&self) -> bool {
        self.client_id != CLIENT_ID_INVALID
    }
}

/// Serve one command connection until it closes
pub fn serve_connection(state: &ServerState, mut stream: UnixStream) {
    let fd = stream.as_raw_fd();
    tracing::debug!("Command connection opened on fd {}", fd);
    let mut ctx = ConnectionContext::new();

    loop {
        let packet = match read_packet(&mut stream, state.max_payload_size) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                tracing::debug!("Command connection on fd {} closed by peer", fd);
                break;
            }
            Err(e) => {
                tracing::error!("Command connection on fd {} torn down: {}", fd, e);
                break;
            }
        };

        let (reply, fatal) = handle_packet(state, &mut ctx, &packet);
        if let Err(e) = write_packet(&mut stream, &reply.to_packet()) {
            tracing::error!("Failed to send reply on fd {}: {}", fd, e);
            break;
        }
        if fatal || ctx.finished {
            break;
        }
    }

    cleanup(state, &mut ctx);
    tracing::debug!("Command connection on fd {} finished", fd);
}

/// Release everything a finished connection still holds: registrations,
/// its START and interval entry, its sensor usage, and the client record
/// once no usage is left
pub fn cleanup(state: &ServerState, ctx: &mut ConnectionContext) {
    if !ctx.has_client() {
        return;
    }
    let client_id = ctx.client_id;
    let sessions = &state.sessions;
    let info = sessions.client_info(client_id);

    if let Some(processor) = ctx.stream.as_ref().and_then(|s| s.processor()) {
        if !ctx.registered.is_empty() {
            tracing::warn!(
                "Connection of {} closed with {} events still registered",
                info,
                ctx.registered.len()
            );
        }
        for event_type in std::mem::take(&mut ctx.registered) {
            sessions.unregister_event(client_id, event_type);
            match processor.delete_client(event_type) {
                Ok(()) => tracing::info!("Unregistered event {} of {}", event_type, info),
                Err(e) => tracing::error!("Unregistering event {} of {} failed: {}", event_type, info, e),
            }
        }

        if processor.get_interval(client_id, IntervalKind::Client).is_some() {
            if let Err(e) = processor.delete_interval(client_id, IntervalKind::Client) {
                tracing::error!("Failed to retract interval of {}: {}", info, e);
            }
        }

        if ctx.started {
            tracing::warn!("{} disconnected without STOP on {}", info, processor.name());
            if let Err(e) = processor.stop() {
                tracing::error!("Failed to stop {}: {}", processor.name(), e);
            }
            ctx.started = false;
        }
    }

    if let Some(sensor) = ctx.sensor.take() {
        if sessions.remove_sensor_usage(client_id, sensor) {
            tracing::info!("Removed {} usage of {}", sensor, info);
        }
    }

    sessions.remove_client_if_unused(client_id);
}
