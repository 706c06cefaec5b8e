//! Simulated sensor-hub (context) processor
//!
//! Commands sent through SEND_SENSORHUB_DATA are forwarded to the hub sensor
//! and answered by one CONTEXT_REPORT hub event echoing the command. The
//! processor keeps a history of the library registrations it forwarded so it
//! can replay them when the hub reports a reset.

use super::processor::idle;
use crate::error::{Result, SensordError};
use crate::module::{ProcessorInput, ProcessorModule, SensorModule};
use crate::processor::ProcessContext;
use crate::types::{
    events, monotonic_timestamp_us, BaseData, BaseProperty, EventType, SensorHubEvent,
    SensorType,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Version stamped on hub events
pub const HUB_VERSION: i32 = 1;

/// Hub id stamped on hub events
pub const HUB_ID: i32 = 0x04BE;

/// What the hub reports after its MCU restarted
pub const RESET_NOTIFICATION: [u8; 3] = [2, 1, 0xD5];

/// Hub instruction bytes (first byte of a command)
pub mod instruction {
    pub const LIB_ADD: u8 = 0xB1;
    pub const LIB_REMOVE: u8 = 0xB2;
    pub const SET_PROPERTY: u8 = 0xC1;
    pub const VOICE_ADD: u8 = 0xE1;
    pub const VOICE_REMOVE: u8 = 0xE2;
}

/// Library id of the pedometer
pub const LIB_PEDOMETER: u8 = 3;

const PEDO_PROPERTY_HEIGHT: u8 = 18;
const PEDO_PROPERTY_WEIGHT: u8 = 19;
const PEDO_PROPERTY_GENDER: u8 = 20;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration commands currently in force on the hub, keyed by
/// instruction byte then library id
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandHistory {
    commands: BTreeMap<u8, BTreeMap<u8, Vec<u8>>>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command that reached the hub
    pub fn input(&mut self, command: &[u8]) {
        let [inst, key, ..] = *command else {
            return;
        };
        match inst {
            instruction::LIB_ADD | instruction::VOICE_ADD => {
                self.commands.entry(inst).or_default().insert(key, command.to_vec());
            }
            // A removal is one above the instruction it undoes
            instruction::LIB_REMOVE | instruction::VOICE_REMOVE => {
                if let Some(set) = self.commands.get_mut(&(inst - 1)) {
                    set.remove(&key);
                }
            }
            instruction::SET_PROPERTY => self.update_pedometer(command),
            _ => {}
        }
    }

    fn update_pedometer(&mut self, command: &[u8]) {
        let &[_, property, value] = command else {
            tracing::error!("Pedometer property command of {} bytes", command.len());
            return;
        };
        let Some(registered) = self
            .commands
            .get_mut(&instruction::LIB_ADD)
            .and_then(|set| set.get_mut(&LIB_PEDOMETER))
        else {
            tracing::error!("Pedometer property set before the pedometer was registered");
            return;
        };
        let index = match property {
            PEDO_PROPERTY_HEIGHT => 2,
            PEDO_PROPERTY_WEIGHT => 3,
            PEDO_PROPERTY_GENDER => 4,
            _ => return,
        };
        if let Some(slot) = registered.get_mut(index) {
            *slot = value;
        }
    }

    /// Every registration in force, in key order
    pub fn registered(&self) -> Vec<Vec<u8>> {
        self.commands
            .values()
            .flat_map(|set| set.values().cloned())
            .collect()
    }

    pub fn is_registered(&self, inst: u8, key: u8) -> bool {
        self.commands.get(&inst).is_some_and(|set| set.contains_key(&key))
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Context processor in front of a simulated sensor hub
pub struct MockHubProcessor {
    name: String,
    sensor: Option<Arc<dyn SensorModule>>,
    // Also serializes commands against replays.
    history: Mutex<CommandHistory>,
    replies: Mutex<VecDeque<Vec<u8>>>,
}

impl MockHubProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sensor: None,
            history: Mutex::new(CommandHistory::new()),
            replies: Mutex::new(VecDeque::new()),
        }
    }

    fn sensor(&self) -> Result<&Arc<dyn SensorModule>> {
        self.sensor
            .as_ref()
            .ok_or_else(|| SensordError::Hardware(format!("{} has no hub sensor", self.name)))
    }

    pub fn history(&self) -> CommandHistory {
        lock(&self.history).clone()
    }

    /// Replay every registration after a hub reset; returns how many were sent
    fn reregister(&self, sensor: &dyn SensorModule, history: &CommandHistory) -> usize {
        let mut sent = 0;
        for command in history.registered() {
            if sensor.send_sensorhub_data(&command) < 0 {
                tracing::error!("{}: failed to reregister {:?}", self.name, command);
            } else {
                sent += 1;
            }
        }
        sent
    }

    fn report(&self, data: Vec<u8>) -> SensorHubEvent {
        SensorHubEvent {
            event_type: events::CONTEXT_REPORT,
            version: HUB_VERSION,
            sensorhub: HUB_ID,
            timestamp: monotonic_timestamp_us() as i64,
            hub_data: data,
            ..Default::default()
        }
    }
}

impl ProcessorModule for MockHubProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sensor_type(&self) -> SensorType {
        SensorType::Context
    }

    fn supported_events(&self) -> Vec<EventType> {
        vec![events::CONTEXT_REPORT]
    }

    fn create_new(&self, name: &str) -> Option<Box<dyn ProcessorModule>> {
        Some(Box::new(MockHubProcessor::new(name)))
    }

    fn add_input(&mut self, input: ProcessorInput) -> bool {
        match input {
            ProcessorInput::Sensor(sensor)
                if self.sensor.is_none() && sensor.sensor_type() == SensorType::Context =>
            {
                self.sensor = Some(sensor);
                true
            }
            ProcessorInput::Sensor(_) => false,
            // Chained processors are tolerated but unused
            ProcessorInput::Processor(_) => true,
        }
    }

    fn activate(&self) -> bool {
        self.sensor().map(|s| s.start()).unwrap_or(false)
    }

    fn deactivate(&self) -> bool {
        lock(&self.history).clear();
        lock(&self.replies).clear();
        self.sensor().map(|s| s.stop()).unwrap_or(false)
    }

    fn process(&self, ctx: &ProcessContext<'_>) -> bool {
        let Ok(sensor) = self.sensor() else {
            return idle(ctx);
        };
        let Some(data) = lock(&self.replies).pop_front() else {
            // Nothing to answer: pace on the hub's interval
            sensor.is_data_ready(true);
            return false;
        };

        if data.as_slice() == RESET_NOTIFICATION {
            let history = lock(&self.history);
            tracing::warn!("{}: sensor hub was reset, reregistering commands", self.name);
            let sent = self.reregister(sensor.as_ref(), &history);
            tracing::info!("{}: {} commands reregistered", self.name, sent);
        }

        if ctx.has_clients(events::CONTEXT_REPORT) {
            ctx.push_hub(self.report(data));
        }
        true
    }

    fn update_polling_interval(&self, interval_ms: u32) -> bool {
        tracing::info!("{}: polling interval set to {}ms", self.name, interval_ms);
        self.sensor()
            .map(|s| s.update_polling_interval(interval_ms))
            .unwrap_or(false)
    }

    fn set_cmd(&self, cmd: i32, property: i32, value: i64) -> i64 {
        self.sensor()
            .map(|s| s.set_cmd(cmd, property, value))
            .unwrap_or(-1)
    }

    fn get_property(&self, level: u32) -> Result<BaseProperty> {
        self.sensor()?.get_property(level)
    }

    fn get_struct_value(&self, struct_type: u32) -> Result<BaseData> {
        self.sensor()?.get_struct_value(struct_type)
    }

    fn send_sensorhub_data(&self, data: &[u8]) -> i32 {
        let mut history = lock(&self.history);
        let Ok(sensor) = self.sensor() else {
            tracing::error!("{}: no hub sensor to send {} bytes to", self.name, data.len());
            return -1;
        };
        let state = sensor.send_sensorhub_data(data);
        if state < 0 {
            tracing::error!("{}: hub refused {} bytes: {}", self.name, data.len(), state);
            return state;
        }
        history.input(data);
        lock(&self.replies).push_back(data.to_vec());
        0
    }
}
