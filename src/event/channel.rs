//! Event channel handshake
//!
//! A client opens its event channel after GET_ID. The first four bytes it
//! sends are its client id; the server checks the id against the session
//! registry, answers with [`EventChannelReady`] and then stores the socket
//! so the dispatcher can push to it.

use crate::error::{Result, ResultExt, SensordError};
use crate::event::EventSocket;
use crate::protocol::{read_full, EventChannelReady, Wire};
use crate::session::SessionRegistry;
use crate::types::ClientId;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Time allowed for the client to send its id
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the handshake on a freshly accepted connection
pub fn accept_event_channel(stream: UnixStream, sessions: &SessionRegistry) -> Result<ClientId> {
    let fd = stream.as_raw_fd();
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .context("Failed to set handshake timeout")?;

    let mut raw = [0u8; 4];
    let mut reader = &stream;
    if !read_full(&mut reader, &mut raw).context(format!("Failed to receive client id on fd {}", fd))? {
        return Err(SensordError::Protocol(format!(
            "Connection on fd {} closed before sending a client id",
            fd
        )));
    }
    let client_id = ClientId::from_le_bytes(raw);

    if !sessions.has_client(client_id) {
        return Err(SensordError::Session(format!(
            "Event channel for unknown client[{}] on fd {}",
            client_id, fd
        )));
    }

    let socket = EventSocket::new(stream).context("Failed to enter transfer mode")?;
    socket
        .send_frame(&EventChannelReady::new(client_id).to_bytes())
        .context(format!(
            "Failed to send channel ready to {}",
            sessions.client_info(client_id)
        ))?;

    if !sessions.set_event_socket(client_id, socket) {
        return Err(SensordError::Session(format!(
            "client[{}] disappeared during the event channel handshake",
            client_id
        )));
    }

    tracing::info!(
        "Event channel accepted for {} on fd {}",
        sessions.client_info(client_id),
        fd
    );
    Ok(client_id)
}
