//! Event Queue
//!
//! Bounded multi-producer handoff from processor workers to the single
//! dispatcher. Producers never block: when the queue is full the item is
//! dropped, counted and logged. The consumer blocks until an item arrives.

use crate::error::{Result, SensordError};
use crate::types::{EventType, SensorEvent, SensorHubEvent, Situation};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One queued event
#[derive(Debug, Clone, PartialEq)]
pub enum EventItem {
    Sensor(SensorEvent),
    Hub(Box<SensorHubEvent>),
}

impl EventItem {
    pub fn event_type(&self) -> EventType {
        match self {
            EventItem::Sensor(event) => event.event_type,
            EventItem::Hub(event) => event.event_type,
        }
    }

    /// Stamp the delivery situation
    pub fn set_situation(&mut self, situation: Situation) {
        match self {
            EventItem::Sensor(event) => event.situation = situation,
            EventItem::Hub(event) => event.situation = situation,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    pushed: AtomicU64,
    dropped: AtomicU64,
    popped: AtomicU64,
}

/// Queue throughput counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub dropped: u64,
    pub popped: u64,
}

/// Cloneable handle to the bounded event queue
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<EventItem>,
    rx: Receiver<EventItem>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enqueue without blocking; a full queue drops the item
    pub fn push(&self, item: EventItem) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    "Event queue full ({} items), dropped event {} ({} dropped so far)",
                    self.capacity,
                    item.event_type(),
                    dropped
                );
                Err(SensordError::QueueOverflow {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(SensordError::Channel("Event queue disconnected".to_string()))
            }
        }
    }

    /// Block until an item is available
    pub fn pop(&self) -> Option<EventItem> {
        let item = self.rx.recv().ok()?;
        self.counters.popped.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Block up to `timeout` for an item
    pub fn pop_timeout(&self, timeout: Duration) -> Option<EventItem> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                self.counters.popped.fetch_add(1, Ordering::Relaxed);
                Some(item)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.counters.pushed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            popped: self.counters.popped.load(Ordering::Relaxed),
        }
    }
}
