//! Simulated processors

use super::sensor::{PROPERTY_GET_WAKEUP, PROPERTY_SET_WAKEUP};
use crate::error::{Result, SensordError};
use crate::module::{ProcessorInput, ProcessorModule, SensorModule};
use crate::processor::ProcessContext;
use crate::types::{events, BaseData, BaseProperty, EventType, SensorEvent, SensorType};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Period between two rotation evaluations
pub const ROTATION_CHECK_INTERVAL_MS: i64 = 200;

/// Gravity low-pass weight of the previous estimate
const GRAVITY_ALPHA: f32 = 0.8;

/// Rotation values carried in ROTATION_CHECK events
pub mod rotation {
    pub const UNKNOWN: i32 = 0;
    pub const LANDSCAPE_LEFT: i32 = 1;
    pub const PORTRAIT_TOP: i32 = 2;
    pub const PORTRAIT_BTM: i32 = 3;
    pub const LANDSCAPE_RIGHT: i32 = 4;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Screen rotation for a gravity vector, `UNKNOWN` when lying flat
pub fn rotation_of(x: f32, y: f32, z: f32) -> i32 {
    let g = (x * x + y * y + z * z).sqrt();
    if g == 0.0 {
        return rotation::UNKNOWN;
    }
    let pitch = 90.0 - (z / g).clamp(-1.0, 1.0).asin().to_degrees().abs();
    if pitch < 30.0 {
        return rotation::UNKNOWN;
    }
    let theta = (x.atan2(y).to_degrees() + 360.0) % 360.0;
    match theta {
        t if !(45.0..315.0).contains(&t) => rotation::PORTRAIT_TOP,
        t if t < 135.0 => rotation::LANDSCAPE_LEFT,
        t if t < 225.0 => rotation::PORTRAIT_BTM,
        _ => rotation::LANDSCAPE_RIGHT,
    }
}

pub(super) fn idle(ctx: &ProcessContext<'_>) -> bool {
    std::thread::sleep(Duration::from_millis(ctx.interval_ms() as u64));
    false
}

struct Orientation {
    gravity: [f32; 3],
    rotation: i32,
    remaining_ms: i64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            gravity: [0.0; 3],
            rotation: rotation::UNKNOWN,
            remaining_ms: ROTATION_CHECK_INTERVAL_MS,
        }
    }
}

/// Accelerometer processor: raw data, gravity, rotation changes and
/// wake-up notifications from one accelerometer input
pub struct MockAccelProcessor {
    name: String,
    sensor: Option<Arc<dyn SensorModule>>,
    orientation: Mutex<Orientation>,
}

impl MockAccelProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sensor: None,
            orientation: Mutex::new(Orientation::default()),
        }
    }

    fn sensor(&self) -> Result<&Arc<dyn SensorModule>> {
        self.sensor
            .as_ref()
            .ok_or_else(|| SensordError::Hardware(format!("{} has no input sensor", self.name)))
    }

    fn check_wakeup(&self, sensor: &dyn SensorModule, ctx: &ProcessContext<'_>) {
        if ctx.has_clients(events::ACCEL_SET_WAKEUP)
            && sensor.set_cmd(0, PROPERTY_GET_WAKEUP, 0) == 1
        {
            tracing::info!("{}: wake-up detected", self.name);
            ctx.push(SensorEvent::notification(
                events::ACCEL_SET_WAKEUP,
                crate::types::monotonic_timestamp_us(),
            ));
        }
    }
}

impl ProcessorModule for MockAccelProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sensor_type(&self) -> SensorType {
        SensorType::Accelerometer
    }

    fn supported_events(&self) -> Vec<EventType> {
        vec![
            events::ACCEL_ROTATION_CHECK,
            events::ACCEL_SET_WAKEUP,
            events::ACCEL_RAW_DATA,
            events::ACCEL_GRAVITY_DATA,
        ]
    }

    fn create_new(&self, name: &str) -> Option<Box<dyn ProcessorModule>> {
        Some(Box::new(MockAccelProcessor::new(name)))
    }

    fn add_input(&mut self, input: ProcessorInput) -> bool {
        match input {
            ProcessorInput::Sensor(sensor)
                if self.sensor.is_none() && sensor.sensor_type() == SensorType::Accelerometer =>
            {
                self.sensor = Some(sensor);
                true
            }
            _ => false,
        }
    }

    fn activate(&self) -> bool {
        *lock(&self.orientation) = Orientation::default();
        self.sensor().map(|s| s.start()).unwrap_or(false)
    }

    fn deactivate(&self) -> bool {
        self.sensor().map(|s| s.stop()).unwrap_or(false)
    }

    fn process(&self, ctx: &ProcessContext<'_>) -> bool {
        let Ok(sensor) = self.sensor() else {
            return idle(ctx);
        };
        self.check_wakeup(sensor.as_ref(), ctx);

        if !sensor.is_data_ready(true) {
            return false;
        }
        let raw = match sensor.get_struct_value(0) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("{}: failed to read sample: {}", self.name, e);
                return false;
            }
        };
        let [x, y, z] = [raw.values[0], raw.values[1], raw.values[2]];

        if ctx.has_clients(events::ACCEL_RAW_DATA) {
            ctx.push(SensorEvent::from_data(events::ACCEL_RAW_DATA, &raw));
        }

        let mut orientation = lock(&self.orientation);
        for (g, v) in orientation.gravity.iter_mut().zip([x, y, z]) {
            *g = GRAVITY_ALPHA * *g + (1.0 - GRAVITY_ALPHA) * v;
        }
        if ctx.has_clients(events::ACCEL_GRAVITY_DATA) {
            let gravity = BaseData::from_values(raw.timestamp, raw.unit_idx, &orientation.gravity);
            ctx.push(SensorEvent::from_data(events::ACCEL_GRAVITY_DATA, &gravity));
        }

        if ctx.has_clients(events::ACCEL_ROTATION_CHECK) {
            orientation.remaining_ms -= ctx.interval_ms() as i64;
            if orientation.remaining_ms <= 0 {
                orientation.remaining_ms = ROTATION_CHECK_INTERVAL_MS;
                let current = rotation_of(x, y, z);
                if current != rotation::UNKNOWN && current != orientation.rotation {
                    tracing::info!("{}: rotation changed to {}", self.name, current);
                    orientation.rotation = current;
                    let mut event = SensorEvent::notification(events::ACCEL_ROTATION_CHECK, raw.timestamp);
                    event.values_num = 1;
                    event.values[0] = current as f32;
                    ctx.push(event);
                }
            }
        }
        true
    }

    fn update_polling_interval(&self, interval_ms: u32) -> bool {
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

    fn on_first_client(&self, event_type: EventType) {
        match event_type {
            events::ACCEL_SET_WAKEUP => {
                self.set_cmd(0, PROPERTY_SET_WAKEUP, 1);
            }
            events::ACCEL_ROTATION_CHECK => {
                let mut orientation = lock(&self.orientation);
                orientation.rotation = rotation::UNKNOWN;
                orientation.remaining_ms = ROTATION_CHECK_INTERVAL_MS;
            }
            _ => {}
        }
    }

    fn on_last_client(&self, event_type: EventType) {
        if event_type == events::ACCEL_SET_WAKEUP {
            self.set_cmd(0, PROPERTY_SET_WAKEUP, 0);
        }
    }
}

/// Processor forwarding each sample of its one input as a single event type
pub struct MockDataProcessor {
    name: String,
    sensor_type: SensorType,
    event_type: EventType,
    sensor: Option<Arc<dyn SensorModule>>,
}

impl MockDataProcessor {
    pub fn new(name: &str, sensor_type: SensorType, event_type: EventType) -> Self {
        Self {
            name: name.to_string(),
            sensor_type,
            event_type,
            sensor: None,
        }
    }

    fn sensor(&self) -> Result<&Arc<dyn SensorModule>> {
        self.sensor
            .as_ref()
            .ok_or_else(|| SensordError::Hardware(format!("{} has no input sensor", self.name)))
    }
}

impl ProcessorModule for MockDataProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    fn supported_events(&self) -> Vec<EventType> {
        vec![self.event_type]
    }

    fn create_new(&self, name: &str) -> Option<Box<dyn ProcessorModule>> {
        Some(Box::new(MockDataProcessor::new(
            name,
            self.sensor_type,
            self.event_type,
        )))
    }

    fn add_input(&mut self, input: ProcessorInput) -> bool {
        match input {
            ProcessorInput::Sensor(sensor)
                if self.sensor.is_none() && sensor.sensor_type() == self.sensor_type =>
            {
                self.sensor = Some(sensor);
                true
            }
            _ => false,
        }
    }

    fn activate(&self) -> bool {
        self.sensor().map(|s| s.start()).unwrap_or(false)
    }

    fn deactivate(&self) -> bool {
        self.sensor().map(|s| s.stop()).unwrap_or(false)
    }

    fn process(&self, ctx: &ProcessContext<'_>) -> bool {
        let Ok(sensor) = self.sensor() else {
            return idle(ctx);
        };
        if !sensor.is_data_ready(true) {
            return false;
        }
        match sensor.get_struct_value(0) {
            Ok(data) => {
                if ctx.has_clients(self.event_type) {
                    ctx.push(SensorEvent::from_data(self.event_type, &data));
                }
                true
            }
            Err(e) => {
                tracing::error!("{}: failed to read sample: {}", self.name, e);
                false
            }
        }
    }

    fn update_polling_interval(&self, interval_ms: u32) -> bool {
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
}
