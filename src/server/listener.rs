//! Unix socket listener with a bounded set of connection workers
//!
//! Both server sockets accept the same way: a non-blocking listener polled
//! against a running flag, and one short-lived thread per accepted
//! connection. A [`ConnectionLimiter`] caps the number of live connection
//! threads; a connection arriving when every permit is taken is closed
//! immediately.

use crate::error::{Result, ResultExt, SensordError};
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between accept attempts when nothing is pending
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Counting limiter for connection threads
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    active: Arc<AtomicUsize>,
    max: usize,
}

/// Held by a connection thread; returns its slot on drop
#[derive(Debug)]
pub struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Take a slot if one is free
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionPermit {
                active: self.active.clone(),
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// Bind a listening socket at `path`, removing a stale socket file first
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(SensordError::Io(e))
                .context(format!("Failed to remove stale socket {}", path.display()))
        }
    }
    let listener =
        UnixListener::bind(path).context(format!("Failed to bind {}", path.display()))?;
    listener
        .set_nonblocking(true)
        .context("Failed to set listener non-blocking")?;
    Ok(listener)
}

type ConnectionHandler = Arc<dyn Fn(UnixStream, ConnectionPermit) + Send + Sync>;

/// A running accept loop
pub struct AcceptLoop {
    name: String,
    path: PathBuf,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AcceptLoop {
    /// Start accepting on `listener`, handing each connection to `handler`
    /// on its own thread
    pub fn spawn(
        name: &str,
        path: PathBuf,
        listener: UnixListener,
        limiter: ConnectionLimiter,
        handler: impl Fn(UnixStream, ConnectionPermit) + Send + Sync + 'static,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handler: ConnectionHandler = Arc::new(handler);

        let thread_running = running.clone();
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("{}-accept", name))
            .spawn(move || accept_loop(&thread_name, listener, limiter, handler, thread_running))
            .map_err(|e| SensordError::Channel(format!("Failed to spawn {} acceptor: {}", name, e)))?;

        tracing::info!("{} listening on {}", name, path.display());
        Ok(Self {
            name: name.to_string(),
            path,
            running,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting and remove the socket file. Connection threads
    /// already running finish on their own.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} accept thread panicked", self.name);
            }
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!("Could not remove {}: {}", self.path.display(), e);
            }
            tracing::info!("{} stopped", self.name);
        }
    }
}

impl Drop for AcceptLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    name: &str,
    listener: UnixListener,
    limiter: ConnectionLimiter,
    handler: ConnectionHandler,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("{}: accept failed: {}", name, e);
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
        };

        if let Err(e) = stream.set_nonblocking(false) {
            tracing::error!("{}: failed to set connection blocking: {}", name, e);
            continue;
        }

        let Some(permit) = limiter.try_acquire() else {
            tracing::warn!(
                "{}: {} connections active, rejecting new connection",
                name,
                limiter.max()
            );
            continue;
        };

        let handler = handler.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-conn", name))
            .spawn(move || handler(stream, permit));
        if let Err(e) = spawned {
            tracing::error!("{}: failed to spawn connection thread: {}", name, e);
        }
    }
}
