//! Event Dispatcher
//!
//! The single consumer of the [`EventQueue`]. For every item it:
//!
//! 1. stamps the cached delivery [`Situation`](crate::types::Situation)
//! 2. records the event in the last-event cache if its type is stateful
//! 3. asks the session registry who listens to this type right now
//! 4. writes the event to each listener's event channel
//!
//! A failed write is logged and the loop moves on to the next listener.
//! The listener set is a snapshot taken per item.

use super::queue::{EventItem, EventQueue};
use crate::error::{Result, SensordError};
use crate::session::SessionRegistry;
use crate::situation::SituationMonitor;
use crate::types::{ClientId, EventType, SensorEvent, SensorType};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long one wait on the queue lasts before the running flag is rechecked
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Items taken from the queue
    pub dispatched: u64,
    /// Successful writes to event channels
    pub delivered: u64,
    /// Failed writes
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    queue: EventQueue,
    sessions: Arc<SessionRegistry>,
    situation: SituationMonitor,
    stateful: HashSet<EventType>,
    last_events: Mutex<HashMap<EventType, SensorEvent>>,
    counters: Counters,
}

/// Cloneable handle to the dispatch logic and last-event cache
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        queue: EventQueue,
        sessions: Arc<SessionRegistry>,
        situation: SituationMonitor,
        stateful: impl IntoIterator<Item = EventType>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                sessions,
                situation,
                stateful: stateful.into_iter().collect(),
                last_events: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.shared.queue
    }

    pub fn is_stateful(&self, event_type: EventType) -> bool {
        self.shared.stateful.contains(&event_type)
    }

    fn last_events(&self) -> std::sync::MutexGuard<'_, HashMap<EventType, SensorEvent>> {
        self.shared
            .last_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_event(&self, event_type: EventType) -> Option<SensorEvent> {
        self.last_events().get(&event_type).copied()
    }

    /// Deliver one item to its current listeners; returns successful writes
    pub fn dispatch(&self, mut item: EventItem) -> usize {
        let shared = &self.shared;
        shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let situation = shared.situation.current();
        item.set_situation(situation);
        let event_type = item.event_type();

        if let EventItem::Sensor(event) = &item {
            if self.is_stateful(event_type) {
                self.last_events().insert(event_type, *event);
            }
        }

        tracing::trace!("Dispatching event {} ({})", event_type, situation);

        let mut delivered = 0;
        for client_id in shared.sessions.get_listener_ids(event_type, situation) {
            let Some(socket) = shared.sessions.get_event_socket(client_id) else {
                tracing::debug!(
                    "{} has no event channel, event {} not sent",
                    shared.sessions.client_info(client_id),
                    event_type
                );
                continue;
            };
            match socket.send_item(&item) {
                Ok(()) => {
                    delivered += 1;
                    tracing::trace!(
                        "Event {} sent to {} on fd {}",
                        event_type,
                        shared.sessions.client_info(client_id),
                        socket.fd()
                    );
                }
                Err(e) => {
                    shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        "Failed to send event {} to {} on fd {}: {}",
                        event_type,
                        shared.sessions.client_info(client_id),
                        socket.fd(),
                        e
                    );
                }
            }
        }
        shared
            .counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Replay cached events of the client's registered stateful types on
    /// `sensor`; returns how many were sent
    pub fn request_last_event(&self, client_id: ClientId, sensor: SensorType) -> usize {
        let sessions = &self.shared.sessions;
        let registered = sessions.registered_events(client_id, sensor);
        if registered.is_empty() {
            return 0;
        }
        let Some(socket) = sessions.get_event_socket(client_id) else {
            tracing::debug!("{} has no event channel for replay", sessions.client_info(client_id));
            return 0;
        };

        let mut sent = 0;
        for event_type in registered {
            if !self.is_stateful(event_type) {
                continue;
            }
            let Some(event) = self.last_event(event_type) else {
                continue;
            };
            match socket.send_event(&event) {
                Ok(()) => {
                    sent += 1;
                    tracing::info!(
                        "Sent last event {} to {} on fd {}",
                        event_type,
                        sessions.client_info(client_id),
                        socket.fd()
                    );
                }
                Err(e) => tracing::error!(
                    "Failed to send last event {} to {}: {}",
                    event_type,
                    sessions.client_info(client_id),
                    e
                ),
            }
        }
        sent
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = &self.shared.counters;
        DispatchStats {
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// The dispatcher thread
pub struct DispatcherThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    dispatcher: Dispatcher,
}

impl DispatcherThread {
    pub fn spawn(dispatcher: Dispatcher) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_dispatcher = dispatcher.clone();
        let handle = std::thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || run(thread_dispatcher, thread_running))
            .map_err(|e| SensordError::Channel(format!("Failed to spawn dispatcher: {}", e)))?;
        Ok(Self {
            running,
            handle: Some(handle),
            dispatcher,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the loop and wait for it; items still queued are discarded
    pub fn stop(&mut self) -> DispatchStats {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Dispatcher thread panicked");
            }
        }
        self.dispatcher.stats()
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(dispatcher: Dispatcher, running: Arc<AtomicBool>) {
    tracing::info!("Event dispatcher started");
    while running.load(Ordering::SeqCst) {
        if let Some(item) = dispatcher.queue().pop_timeout(POP_TIMEOUT) {
            dispatcher.dispatch(item);
        }
    }
    let stats = dispatcher.stats();
    tracing::info!(
        "Event dispatcher stopped: {} dispatched, {} delivered, {} failed",
        stats.dispatched,
        stats.delivered,
        stats.failed
    );
}
