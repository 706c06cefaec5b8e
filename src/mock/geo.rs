//! Simulated geomagnetic processor fused with the accelerometer stream
//!
//! It chains onto a composed accelerometer processor: while running it holds
//! one start, one ACCEL_RAW_DATA registration and one processor-kind interval
//! entry on that upstream processor, and combines upstream samples with its
//! own magnetometer into attitude events.

use super::processor::idle;
use crate::error::{Result, SensordError};
use crate::module::{ProcessorInput, ProcessorModule, SensorModule};
use crate::processor::{IntervalKind, ProcessContext, Processor};
use crate::types::{
    events, unit, BaseData, BaseProperty, ClientId, EventType, SensorEvent, SensorType,
};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

/// Interval requested from the accelerometer before any client asked
pub const GEO_POLLING_INTERVAL_MS: u32 = 200;

static NEXT_CHAIN_ID: AtomicI32 = AtomicI32::new(1);

/// Azimuth, pitch and roll in degrees from an accelerometer and a
/// magnetometer sample
pub fn attitude(accel: [f32; 3], mag: [f32; 3]) -> [f32; 3] {
    let [ax, ay, az] = accel;
    let [mx, my, mz] = mag;
    let roll = ay.atan2(az);
    let pitch = (-ax).atan2(ay * roll.sin() + az * roll.cos());
    let bx = mx * pitch.cos() + my * pitch.sin() * roll.sin() + mz * pitch.sin() * roll.cos();
    let by = my * roll.cos() - mz * roll.sin();
    let azimuth = ((-by).atan2(bx).to_degrees() + 360.0) % 360.0;
    [azimuth, pitch.to_degrees(), roll.to_degrees()]
}

/// Geomagnetic processor reading acceleration from an upstream processor
pub struct MockGeoProcessor {
    name: String,
    chain_id: ClientId,
    sensor: Option<Arc<dyn SensorModule>>,
    accel: Option<Arc<Processor>>,
    interval_ms: AtomicU32,
    running: AtomicBool,
}

impl MockGeoProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chain_id: NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed),
            sensor: None,
            accel: None,
            interval_ms: AtomicU32::new(GEO_POLLING_INTERVAL_MS),
            running: AtomicBool::new(false),
        }
    }

    /// Id of this processor's entries on its upstream
    pub fn chain_id(&self) -> ClientId {
        self.chain_id
    }

    fn sensor(&self) -> Result<&Arc<dyn SensorModule>> {
        self.sensor
            .as_ref()
            .ok_or_else(|| SensordError::Hardware(format!("{} has no geomagnetic sensor", self.name)))
    }

    fn accel(&self) -> Result<&Arc<Processor>> {
        self.accel
            .as_ref()
            .ok_or_else(|| SensordError::Hardware(format!("{} has no accelerometer input", self.name)))
    }

    /// Take a start, a registration and an interval entry on the upstream
    fn attach_upstream(&self, accel: &Arc<Processor>) -> Result<()> {
        accel.add_client(events::ACCEL_RAW_DATA)?;
        let interval = self.interval_ms.load(Ordering::SeqCst);
        if let Err(e) = accel.add_interval(self.chain_id, interval, IntervalKind::Processor) {
            let _ = accel.delete_client(events::ACCEL_RAW_DATA);
            return Err(e);
        }
        if let Err(e) = accel.start() {
            let _ = accel.delete_interval(self.chain_id, IntervalKind::Processor);
            let _ = accel.delete_client(events::ACCEL_RAW_DATA);
            return Err(e);
        }
        Ok(())
    }

    fn detach_upstream(&self, accel: &Processor) {
        let released = [
            accel.stop(),
            accel.delete_client(events::ACCEL_RAW_DATA),
            accel.delete_interval(self.chain_id, IntervalKind::Processor),
        ];
        for e in released.into_iter().filter_map(|r| r.err()) {
            tracing::debug!("{}: upstream {} already released: {}", self.name, accel.name(), e);
        }
    }
}

impl ProcessorModule for MockGeoProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sensor_type(&self) -> SensorType {
        SensorType::Geomagnetic
    }

    fn supported_events(&self) -> Vec<EventType> {
        vec![
            events::GEOMAG_CALIBRATION_NEEDED,
            events::GEOMAG_ATTITUDE_DATA,
            events::GEOMAG_RAW_DATA,
        ]
    }

    fn create_new(&self, name: &str) -> Option<Box<dyn ProcessorModule>> {
        Some(Box::new(MockGeoProcessor::new(name)))
    }

    fn add_input(&mut self, input: ProcessorInput) -> bool {
        match input {
            ProcessorInput::Sensor(sensor)
                if self.sensor.is_none() && sensor.sensor_type() == SensorType::Geomagnetic =>
            {
                self.sensor = Some(sensor);
                true
            }
            ProcessorInput::Processor(processor)
                if self.accel.is_none() && processor.sensor_type() == SensorType::Accelerometer =>
            {
                self.accel = Some(processor);
                true
            }
            _ => false,
        }
    }

    fn activate(&self) -> bool {
        let (Ok(sensor), Ok(accel)) = (self.sensor(), self.accel()) else {
            tracing::error!("{}: inputs missing", self.name);
            return false;
        };
        if let Err(e) = self.attach_upstream(accel) {
            tracing::error!("{}: failed to start {}: {}", self.name, accel.name(), e);
            return false;
        }
        if !sensor.start() {
            tracing::error!("{}: failed to start {}", self.name, sensor.name());
            self.detach_upstream(accel);
            return false;
        }
        self.running.store(true, Ordering::SeqCst);
        true
    }

    fn deactivate(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(accel) = self.accel() {
            self.detach_upstream(accel);
        }
        self.sensor().map(|s| s.stop()).unwrap_or(false)
    }

    fn process(&self, ctx: &ProcessContext<'_>) -> bool {
        let (Ok(sensor), Ok(accel)) = (self.sensor(), self.accel()) else {
            return idle(ctx);
        };
        if !sensor.is_data_ready(true) {
            return false;
        }
        let (mag, acc) = match (sensor.get_struct_value(0), accel.get_struct_value(0)) {
            (Ok(mag), Ok(acc)) => (mag, acc),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("{}: failed to read samples: {}", self.name, e);
                return false;
            }
        };

        if ctx.has_clients(events::GEOMAG_RAW_DATA) {
            ctx.push(SensorEvent::from_data(events::GEOMAG_RAW_DATA, &mag));
        }
        if ctx.has_clients(events::GEOMAG_ATTITUDE_DATA) {
            let values = attitude(
                [acc.values[0], acc.values[1], acc.values[2]],
                [mag.values[0], mag.values[1], mag.values[2]],
            );
            let data = BaseData::from_values(mag.timestamp, unit::DEGREE, &values);
            ctx.push(SensorEvent::from_data(events::GEOMAG_ATTITUDE_DATA, &data));
        }
        true
    }

    fn update_polling_interval(&self, interval_ms: u32) -> bool {
        tracing::info!("{}: polling interval set to {}ms", self.name, interval_ms);
        self.interval_ms.store(interval_ms, Ordering::SeqCst);
        if self.running.load(Ordering::SeqCst) {
            if let Ok(accel) = self.accel() {
                if let Err(e) = accel.add_interval(self.chain_id, interval_ms, IntervalKind::Processor) {
                    tracing::warn!("{}: upstream kept its interval: {}", self.name, e);
                }
            }
        }
        self.sensor()
            .map(|s| s.update_polling_interval(interval_ms))
            .unwrap_or(false)
    }

    fn set_cmd(&self, _cmd: i32, _property: i32, _value: i64) -> i64 {
        -1
    }

    fn get_property(&self, level: u32) -> Result<BaseProperty> {
        self.sensor()?.get_property(level)
    }

    fn get_struct_value(&self, struct_type: u32) -> Result<BaseData> {
        self.sensor()?.get_struct_value(struct_type)
    }
}
