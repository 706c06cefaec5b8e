//! Event channel socket
//!
//! A connected event channel in non-blocking "transfer" mode. The handle is
//! shared between the session registry, the dispatcher and the last-event
//! replay, so writes are serialized by a lock to keep frames whole.
//!
//! A send that fails (after the bounded retries) may have left a partial
//! frame on the wire, so the socket is shut down and every later send fails
//! fast. The client sees end-of-stream and reconnects.

use crate::event::queue::EventItem;
use crate::protocol::{encode_hub_event_frame, encode_sensor_event_frame, write_full};
use crate::types::SensorEvent;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Inner {
    stream: Mutex<UnixStream>,
    broken: AtomicBool,
    fd: i32,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(stream) = self.stream.get_mut() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Shared handle to a client's event channel
#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<Inner>,
}

impl EventSocket {
    /// Switch `stream` to transfer mode and wrap it
    pub fn new(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();
        Ok(Self {
            inner: Arc::new(Inner {
                stream: Mutex::new(stream),
                broken: AtomicBool::new(false),
                fd,
            }),
        })
    }

    /// Descriptor number, for logs
    pub fn fd(&self) -> i32 {
        self.inner.fd
    }

    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::SeqCst)
    }

    /// Write one complete frame
    pub fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        if self.is_broken() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "event channel already failed",
            ));
        }
        let mut stream = self
            .inner
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = write_full(&mut *stream, frame);
        if result.is_err() {
            self.inner.broken.store(true, Ordering::SeqCst);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        result
    }

    pub fn send_event(&self, event: &SensorEvent) -> io::Result<()> {
        self.send_frame(&encode_sensor_event_frame(event))
    }

    pub fn send_item(&self, item: &EventItem) -> io::Result<()> {
        match item {
            EventItem::Sensor(event) => self.send_event(event),
            EventItem::Hub(event) => self.send_frame(&encode_hub_event_frame(event)),
        }
    }

    /// Whether two handles refer to the same connection
    pub fn same_as(&self, other: &EventSocket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for EventSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSocket")
            .field("fd", &self.inner.fd)
            .field("broken", &self.is_broken())
            .finish()
    }
}
