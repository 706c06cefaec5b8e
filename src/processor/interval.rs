//! Interval arbitration
//!
//! Every client (and every downstream processor) asks a processor for a
//! polling period. The hardware runs at the minimum of all requests, or at
//! [`DEFAULT_POLLING_INTERVAL_MS`] when nobody asked.

use crate::types::{ClientId, DEFAULT_POLLING_INTERVAL_MS};

/// Who contributed an interval entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalKind {
    /// A connected client
    Client,
    /// A downstream processor using this one as its input
    Processor,
}

/// One requested polling period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalEntry {
    pub client_id: ClientId,
    pub interval_ms: u32,
    pub kind: IntervalKind,
}

/// Outcome of a mutation that may require reprogramming the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalUpdate {
    /// Interval the hardware must be programmed to, if it changed
    pub reprogram: Option<u32>,
    /// Entry that was replaced or removed, for rollback
    pub previous: Option<IntervalEntry>,
}

/// Set of interval entries for one processor
#[derive(Debug, Clone, Default)]
pub struct IntervalArbiter {
    entries: Vec<IntervalEntry>,
}

impl IntervalArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum requested interval, `None` when the set is empty
    pub fn min(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.interval_ms).min()
    }

    /// Interval the hardware should run at
    pub fn effective(&self) -> u32 {
        self.min().unwrap_or(DEFAULT_POLLING_INTERVAL_MS)
    }

    pub fn get(&self, client_id: ClientId, kind: IntervalKind) -> Option<u32> {
        self.position(client_id, kind)
            .map(|index| self.entries[index].interval_ms)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, client_id: ClientId, kind: IntervalKind) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.client_id == client_id && e.kind == kind)
    }

    /// Insert or replace the entry of `(client_id, kind)`
    pub fn add(&mut self, client_id: ClientId, interval_ms: u32, kind: IntervalKind) -> IntervalUpdate {
        let before = self.min();
        let entry = IntervalEntry {
            client_id,
            interval_ms,
            kind,
        };
        let previous = match self.position(client_id, kind) {
            Some(index) => Some(std::mem::replace(&mut self.entries[index], entry)),
            None => {
                self.entries.push(entry);
                None
            }
        };
        let after = self.min();
        IntervalUpdate {
            reprogram: if after != before { after } else { None },
            previous,
        }
    }

    /// Remove the entry of `(client_id, kind)`; `None` when there was none
    pub fn remove(&mut self, client_id: ClientId, kind: IntervalKind) -> Option<IntervalUpdate> {
        let before = self.min();
        let index = self.position(client_id, kind)?;
        let removed = self.entries.remove(index);
        let reprogram = match self.min() {
            None => Some(DEFAULT_POLLING_INTERVAL_MS),
            Some(after) if Some(after) != before => Some(after),
            Some(_) => None,
        };
        Some(IntervalUpdate {
            reprogram,
            previous: Some(removed),
        })
    }

    /// Undo an `add` or `remove` whose hardware reprogramming failed
    pub fn rollback(&mut self, client_id: ClientId, kind: IntervalKind, previous: Option<IntervalEntry>) {
        match (self.position(client_id, kind), previous) {
            (Some(index), Some(entry)) => self.entries[index] = entry,
            (Some(index), None) => {
                self.entries.remove(index);
            }
            (None, Some(entry)) => self.entries.push(entry),
            (None, None) => {}
        }
    }
}
