//! Simulated sensor device

use super::pattern::{SignalAxis, SignalPattern};
use crate::error::Result;
use crate::module::SensorModule;
use crate::types::{
    monotonic_timestamp_us, unit, BaseData, BaseProperty, SensorType, DEFAULT_POLLING_INTERVAL_MS,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Vendor property enabling (value 1) or disabling (value 0) the wake-up interrupt
pub const PROPERTY_SET_WAKEUP: i32 = 0x11;

/// Vendor property reading and clearing a pending wake-up (1 if one fired)
pub const PROPERTY_GET_WAKEUP: i32 = 0x12;

/// Vendor property raising a wake-up, for driving the simulation
pub const PROPERTY_TRIGGER_WAKEUP: i32 = 0x13;

#[derive(Default)]
struct Sampling {
    started_at: Option<Instant>,
    latest: Option<BaseData>,
}

/// A sensor producing values from [`SignalPattern`]s.
///
/// `is_data_ready(true)` sleeps for the programmed polling interval, like a
/// device blocking on its next interrupt.
pub struct MockSensor {
    name: String,
    sensor_type: SensorType,
    unit_idx: i32,
    property: BaseProperty,
    axes: Mutex<Vec<SignalAxis>>,
    sampling: Mutex<Sampling>,
    interval_ms: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    hub_bytes: AtomicU32,
    wakeup_enabled: AtomicBool,
    wakeup_pending: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockSensor {
    /// A sensor with the default signal for its kind
    pub fn new(name: &str, sensor_type: SensorType) -> Self {
        let (unit_idx, axes, range) = match sensor_type {
            SensorType::Accelerometer => (
                unit::METRE_PER_SECOND_SQUARED,
                vec![
                    SignalAxis::new(SignalPattern::Sine {
                        frequency: 0.2,
                        amplitude: 0.5,
                        offset: 0.0,
                    })
                    .with_noise(0.05),
                    SignalAxis::new(SignalPattern::Constant(9.8)).with_noise(0.05),
                    SignalAxis::new(SignalPattern::Sine {
                        frequency: 0.1,
                        amplitude: 0.5,
                        offset: 0.5,
                    }),
                ],
                (-19.6, 19.6),
            ),
            SensorType::Geomagnetic => (
                unit::MICRO_TESLA,
                vec![
                    SignalAxis::new(SignalPattern::Sine {
                        frequency: 0.05,
                        amplitude: 20.0,
                        offset: 5.0,
                    })
                    .with_noise(0.2),
                    SignalAxis::new(SignalPattern::Sine {
                        frequency: 0.05,
                        amplitude: 20.0,
                        offset: 15.0,
                    })
                    .with_noise(0.2),
                    SignalAxis::new(SignalPattern::Constant(-40.0)).with_noise(0.2),
                ],
                (-1200.0, 1200.0),
            ),
            SensorType::Light => (
                unit::LUX,
                vec![SignalAxis::new(SignalPattern::Sine {
                    frequency: 0.05,
                    amplitude: 200.0,
                    offset: 300.0,
                })],
                (0.0, 65535.0),
            ),
            SensorType::Proximity => (
                unit::STATE_ON_OFF,
                vec![SignalAxis::new(SignalPattern::Square {
                    period: 10.0,
                    low: 0.0,
                    high: 1.0,
                })],
                (0.0, 1.0),
            ),
            _ => (unit::UNDEFINED, vec![SignalAxis::new(SignalPattern::default())], (0.0, 1.0)),
        };

        Self {
            name: name.to_string(),
            sensor_type,
            unit_idx,
            property: BaseProperty {
                unit_idx,
                min_range: range.0,
                max_range: range.1,
                resolution: 0.01,
                name: name.to_string(),
                vendor: "sensord-mock".to_string(),
            },
            axes: Mutex::new(axes),
            sampling: Mutex::new(Sampling::default()),
            interval_ms: AtomicU32::new(DEFAULT_POLLING_INTERVAL_MS),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            hub_bytes: AtomicU32::new(0),
            wakeup_enabled: AtomicBool::new(false),
            wakeup_pending: AtomicBool::new(false),
        }
    }

    /// Replace the per-axis signals
    pub fn with_axes(self, axes: Vec<SignalAxis>) -> Self {
        *lock(&self.axes) = axes;
        self
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Interval last programmed through `update_polling_interval`
    pub fn polling_interval(&self) -> u32 {
        self.interval_ms.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sampling).started_at.is_some()
    }

    /// Bytes accepted through `send_sensorhub_data`
    pub fn hub_bytes_received(&self) -> u32 {
        self.hub_bytes.load(Ordering::SeqCst)
    }

    pub fn is_wakeup_enabled(&self) -> bool {
        self.wakeup_enabled.load(Ordering::SeqCst)
    }

    fn take_sample(&self, sampling: &mut Sampling) -> BaseData {
        let elapsed = sampling
            .started_at
            .map(|t| t.elapsed().as_secs_f32())
            .unwrap_or(0.0);
        let values: Vec<f32> = lock(&self.axes).iter_mut().map(|a| a.sample(elapsed)).collect();
        let data = BaseData::from_values(monotonic_timestamp_us(), self.unit_idx, &values);
        sampling.latest = Some(data);
        data
    }
}

impl SensorModule for MockSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    fn start(&self) -> bool {
        self.starts.fetch_add(1, Ordering::SeqCst);
        lock(&self.sampling).started_at = Some(Instant::now());
        tracing::debug!("Mock sensor {} started", self.name);
        true
    }

    fn stop(&self) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        lock(&self.sampling).started_at = None;
        tracing::debug!("Mock sensor {} stopped", self.name);
        true
    }

    fn is_data_ready(&self, wait: bool) -> bool {
        if wait {
            let interval = self.interval_ms.load(Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(interval as u64));
        }
        let mut sampling = lock(&self.sampling);
        if sampling.started_at.is_none() {
            return false;
        }
        self.take_sample(&mut sampling);
        true
    }

    fn update_polling_interval(&self, interval_ms: u32) -> bool {
        if interval_ms == 0 {
            return false;
        }
        self.interval_ms.store(interval_ms, Ordering::SeqCst);
        tracing::debug!("Mock sensor {} polling every {}ms", self.name, interval_ms);
        true
    }

    fn get_property(&self, _level: u32) -> Result<BaseProperty> {
        Ok(self.property.clone())
    }

    fn get_struct_value(&self, _struct_type: u32) -> Result<BaseData> {
        let mut sampling = lock(&self.sampling);
        match sampling.latest {
            Some(data) => Ok(data),
            None => Ok(self.take_sample(&mut sampling)),
        }
    }

    fn set_cmd(&self, _cmd: i32, property: i32, value: i64) -> i64 {
        match property {
            PROPERTY_SET_WAKEUP => {
                self.wakeup_enabled.store(value != 0, Ordering::SeqCst);
                0
            }
            PROPERTY_GET_WAKEUP => {
                let fired = self.wakeup_enabled.load(Ordering::SeqCst)
                    && self.wakeup_pending.swap(false, Ordering::SeqCst);
                fired as i64
            }
            PROPERTY_TRIGGER_WAKEUP => {
                self.wakeup_pending.store(true, Ordering::SeqCst);
                0
            }
            _ => -1,
        }
    }

    /// Only a context hub takes commands
    fn send_sensorhub_data(&self, data: &[u8]) -> i32 {
        if self.sensor_type != SensorType::Context || data.is_empty() {
            return -1;
        }
        self.hub_bytes.fetch_add(data.len() as u32, Ordering::SeqCst);
        0
    }
}
