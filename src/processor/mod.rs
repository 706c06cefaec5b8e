//! Processor runtime
//!
//! A [`Processor`] wraps one composed [`ProcessorModule`] instance and owns
//! the state the broker shares across clients for it:
//!
//! - **Start refcount** - the first START activates hardware and spawns the
//!   polling worker, later STARTs only count; the last STOP reverses it
//! - **Client counts** - a refcount per supported event type, driving the
//!   module's first-client / last-client hooks
//! - **Interval arbiter** - the minimum requested polling period, written to
//!   hardware under the same lock that mutates the request set
//!
//! Each of these has its own lock, so a slow hardware activation does not
//! block interval or subscription changes on other clients.

pub mod interval;
pub mod worker;

pub use interval::{IntervalArbiter, IntervalEntry, IntervalKind, IntervalUpdate};
pub use worker::{ProcessorWorker, WorkerStats, WorkerStatsSnapshot};

use crate::error::{Result, SensordError};
use crate::event::queue::{EventItem, EventQueue};
use crate::module::{PluginLibrary, ProcessorInput, ProcessorModule};
use crate::types::{
    BaseData, BaseProperty, ClientId, EventType, SensorEvent, SensorHubEvent, SensorType,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Start refcount and the worker it controls
#[derive(Default)]
struct Activation {
    starts: u32,
    worker: Option<ProcessorWorker>,
}

/// Runtime wrapper around one processor instance
pub struct Processor {
    module: Box<dyn ProcessorModule>,
    supported: Vec<EventType>,
    queue: EventQueue,
    clients: Mutex<HashMap<EventType, u32>>,
    intervals: Mutex<IntervalArbiter>,
    activation: Mutex<Activation>,
    // Declared after `module` so the code it points into outlives it.
    libraries: Vec<Arc<PluginLibrary>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Processor {
    /// Wrap a freshly created processor instance that pushes into `queue`
    pub fn new(module: Box<dyn ProcessorModule>, queue: EventQueue) -> Self {
        let supported = module.supported_events();
        Self {
            module,
            supported,
            queue,
            clients: Mutex::new(HashMap::new()),
            intervals: Mutex::new(IntervalArbiter::new()),
            activation: Mutex::new(Activation::default()),
            libraries: Vec::new(),
        }
    }

    /// Keep `library` open for as long as this processor lives
    pub fn attach_library(&mut self, library: Arc<PluginLibrary>) {
        if !self.libraries.iter().any(|l| Arc::ptr_eq(l, &library)) {
            self.libraries.push(library);
        }
    }

    /// Wire an input into the processor logic
    pub fn add_input(&mut self, input: ProcessorInput, library: Option<Arc<PluginLibrary>>) -> bool {
        let name = input.name().to_string();
        if !self.module.add_input(input) {
            tracing::warn!("Processor {} rejected input {}", self.name(), name);
            return false;
        }
        if let Some(library) = library {
            self.attach_library(library);
        }
        tracing::debug!("Processor {} added input {}", self.name(), name);
        true
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn sensor_type(&self) -> SensorType {
        self.module.sensor_type()
    }

    pub fn module(&self) -> &dyn ProcessorModule {
        self.module.as_ref()
    }

    // ---- start / stop ----

    /// Count a START; the first one activates hardware and starts polling
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut activation = lock(&self.activation);
        if activation.starts == 0 {
            if !self.module.activate() {
                tracing::error!("Processor {} failed to activate", self.name());
                return Err(SensordError::Hardware(format!(
                    "Failed to activate {}",
                    self.name()
                )));
            }
            match ProcessorWorker::spawn(self.clone()) {
                Ok(worker) => activation.worker = Some(worker),
                Err(e) => {
                    self.module.deactivate();
                    return Err(e);
                }
            }
            tracing::info!("Processor {} activated", self.name());
        }
        activation.starts += 1;
        tracing::debug!("Processor {} start count {}", self.name(), activation.starts);
        Ok(())
    }

    /// Count a STOP; the last one stops polling and deactivates hardware
    pub fn stop(&self) -> Result<()> {
        let mut activation = lock(&self.activation);
        if activation.starts == 0 {
            return Err(SensordError::Session(format!(
                "Processor {} is not started",
                self.name()
            )));
        }
        activation.starts -= 1;
        if activation.starts == 0 {
            if let Some(worker) = activation.worker.take() {
                worker.stop();
            }
            if !self.module.deactivate() {
                tracing::warn!("Processor {} failed to deactivate", self.name());
            }
            tracing::info!("Processor {} deactivated", self.name());
        } else {
            tracing::debug!("Processor {} start count {}", self.name(), activation.starts);
        }
        Ok(())
    }

    /// Current start refcount
    pub fn start_count(&self) -> u32 {
        lock(&self.activation).starts
    }

    /// Whether the hardware is active
    pub fn is_active(&self) -> bool {
        self.start_count() > 0
    }

    /// Polling statistics of the running worker
    pub fn worker_stats(&self) -> Option<WorkerStatsSnapshot> {
        lock(&self.activation).worker.as_ref().map(|w| w.stats())
    }

    /// Stop regardless of the refcount
    pub fn shutdown(&self) {
        let mut activation = lock(&self.activation);
        if activation.starts == 0 {
            return;
        }
        activation.starts = 0;
        if let Some(worker) = activation.worker.take() {
            let stats = worker.stop();
            tracing::info!(
                "Processor {} shut down: {} polls, {} events",
                self.name(),
                stats.polls,
                stats.events
            );
        }
        self.module.deactivate();
    }

    /// One polling step, run by the worker thread
    pub(crate) fn poll_once(&self) -> (bool, u64) {
        let ctx = ProcessContext {
            processor: self,
            pushed: Cell::new(0),
        };
        let produced = self.module.process(&ctx);
        (produced, ctx.pushed.get())
    }

    // ---- client counts ----

    pub fn is_supported(&self, event_type: EventType) -> bool {
        self.supported.contains(&event_type)
    }

    pub fn supported_events(&self) -> &[EventType] {
        &self.supported
    }

    /// Count a registration for `event_type`
    pub fn add_client(&self, event_type: EventType) -> Result<()> {
        if !self.is_supported(event_type) {
            return Err(SensordError::Session(format!(
                "Event {} is not supported by {}",
                event_type,
                self.name()
            )));
        }
        let count = {
            let mut clients = lock(&self.clients);
            let count = clients.entry(event_type).or_insert(0);
            *count += 1;
            *count
        };
        if count == 1 {
            self.module.on_first_client(event_type);
        }
        Ok(())
    }

    /// Drop a registration for `event_type`; fails when none is counted
    pub fn delete_client(&self, event_type: EventType) -> Result<()> {
        if !self.is_supported(event_type) {
            return Err(SensordError::Session(format!(
                "Event {} is not supported by {}",
                event_type,
                self.name()
            )));
        }
        let count = {
            let mut clients = lock(&self.clients);
            match clients.get_mut(&event_type) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    *count
                }
                _ => {
                    return Err(SensordError::Session(format!(
                        "Event {} has no clients on {}",
                        event_type,
                        self.name()
                    )))
                }
            }
        };
        if count == 0 {
            self.module.on_last_client(event_type);
        }
        Ok(())
    }

    pub fn client_count(&self, event_type: EventType) -> u32 {
        lock(&self.clients).get(&event_type).copied().unwrap_or(0)
    }

    // ---- intervals ----

    /// Contribute an interval entry and reprogram hardware if the minimum moved
    pub fn add_interval(&self, client_id: ClientId, interval_ms: u32, kind: IntervalKind) -> Result<()> {
        let mut intervals = lock(&self.intervals);
        let update = intervals.add(client_id, interval_ms, kind);
        if let Some(ms) = update.reprogram {
            if !self.module.update_polling_interval(ms) {
                intervals.rollback(client_id, kind, update.previous);
                return Err(SensordError::Hardware(format!(
                    "Failed to set {} polling interval to {}ms",
                    self.name(),
                    ms
                )));
            }
            tracing::info!(
                "Polling interval of {} set to {}ms by client {} ({:?})",
                self.name(),
                ms,
                client_id,
                kind
            );
        }
        Ok(())
    }

    /// Retract an interval entry; falls back to the default when none remain
    pub fn delete_interval(&self, client_id: ClientId, kind: IntervalKind) -> Result<()> {
        let mut intervals = lock(&self.intervals);
        let Some(update) = intervals.remove(client_id, kind) else {
            return Err(SensordError::Session(format!(
                "Client {} has no interval on {}",
                client_id,
                self.name()
            )));
        };
        if let Some(ms) = update.reprogram {
            if !self.module.update_polling_interval(ms) {
                intervals.rollback(client_id, kind, update.previous);
                return Err(SensordError::Hardware(format!(
                    "Failed to set {} polling interval to {}ms",
                    self.name(),
                    ms
                )));
            }
            tracing::info!(
                "Polling interval of {} set to {}ms after client {} left",
                self.name(),
                ms,
                client_id
            );
        }
        Ok(())
    }

    pub fn get_interval(&self, client_id: ClientId, kind: IntervalKind) -> Option<u32> {
        lock(&self.intervals).get(client_id, kind)
    }

    /// Interval the hardware currently runs at
    pub fn effective_interval(&self) -> u32 {
        lock(&self.intervals).effective()
    }

    // ---- delegated reads and writes ----

    pub fn get_property(&self, level: u32) -> Result<BaseProperty> {
        self.module.get_property(level)
    }

    pub fn get_struct_value(&self, struct_type: u32) -> Result<BaseData> {
        self.module.get_struct_value(struct_type)
    }

    pub fn set_cmd(&self, cmd: i32, property: i32, value: i64) -> i64 {
        self.module.set_cmd(cmd, property, value)
    }

    pub fn send_sensorhub_data(&self, data: &[u8]) -> i32 {
        self.module.send_sensorhub_data(data)
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        let activation = self
            .activation
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if activation.starts > 0 {
            self.module.deactivate();
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name())
            .field("supported", &self.supported)
            .finish()
    }
}

/// Handle given to [`ProcessorModule::process`] for one polling step
pub struct ProcessContext<'a> {
    processor: &'a Processor,
    pushed: Cell<u64>,
}

impl<'a> ProcessContext<'a> {
    /// Registrations currently counted for `event_type`
    pub fn client_count(&self, event_type: EventType) -> u32 {
        self.processor.client_count(event_type)
    }

    pub fn has_clients(&self, event_type: EventType) -> bool {
        self.client_count(event_type) > 0
    }

    /// Interval the hardware runs at
    pub fn interval_ms(&self) -> u32 {
        self.processor.effective_interval()
    }

    /// Queue an event; overflow is handled (and logged) by the queue
    pub fn push(&self, event: SensorEvent) {
        if self.processor.queue.push(EventItem::Sensor(event)).is_ok() {
            self.pushed.set(self.pushed.get() + 1);
        }
    }

    /// Queue a sensor-hub event
    pub fn push_hub(&self, event: SensorHubEvent) {
        if self.processor.queue.push(EventItem::Hub(Box::new(event))).is_ok() {
            self.pushed.set(self.pushed.get() + 1);
        }
    }
}
