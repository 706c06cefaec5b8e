//! Core data types for sensord-rs
//!
//! This module defines the identifiers and fixed-size value types shared by
//! every subsystem: sensor and event identifiers, the event structs pushed to
//! clients, the property/data structs returned by modules, and the delivery
//! situation that gates which subscribers see an event.
//!
//! # Event types
//!
//! An event type is a 32-bit value whose upper 16 bits carry the
//! [`SensorType`] and whose lower 16 bits carry a single event bit:
//!
//! ```text
//! 0x0001_0010
//!   ^^^^ ^^^^
//!   |    event bit (RAW_DATA_REPORT_ON_TIME)
//!   sensor (ACCELEROMETER)
//! ```

use std::fmt;

/// Client identifier assigned by the server on GET_ID
pub type ClientId = i32;

/// Marker for "no client bound yet"
pub const CLIENT_ID_INVALID: ClientId = -1;

/// Number of float values carried by a sensor event / data struct
pub const MAX_VALUE_SIZE: usize = 12;

/// Fixed width of the name and vendor strings in [`BaseProperty`]
pub const MAX_KEY_LEN: usize = 30;

/// Maximum opaque payload carried by a sensor-hub event or command
pub const HUB_DATA_MAX_SIZE: usize = 4096;

/// Number of float values carried by a sensor-hub event
pub const HUB_FLOAT_COUNT: usize = 16;

/// Polling interval used when no client requested one (1 Hz)
pub const DEFAULT_POLLING_INTERVAL_MS: u32 = 1000;

/// Physical or virtual sensor kinds known to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum SensorType {
    Unknown = 0,
    Accelerometer = 1,
    Geomagnetic = 2,
    Light = 3,
    Proximity = 4,
    Thermometer = 5,
    Gyroscope = 6,
    Pressure = 7,
    Motion = 8,
    Fusion = 9,
    Pedometer = 10,
    Context = 11,
    Flat = 12,
    Bio = 13,
    BioHrm = 14,
}

impl SensorType {
    /// All known sensor types (excluding `Unknown`)
    pub const ALL: [SensorType; 14] = [
        SensorType::Accelerometer,
        SensorType::Geomagnetic,
        SensorType::Light,
        SensorType::Proximity,
        SensorType::Thermometer,
        SensorType::Gyroscope,
        SensorType::Pressure,
        SensorType::Motion,
        SensorType::Fusion,
        SensorType::Pedometer,
        SensorType::Context,
        SensorType::Flat,
        SensorType::Bio,
        SensorType::BioHrm,
    ];

    /// Convert a raw wire value into a sensor type
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 {
            return Some(SensorType::Unknown);
        }
        Self::ALL.iter().copied().find(|s| *s as u32 == raw)
    }

    /// Raw wire value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Short lowercase name used in logs
    pub fn label(self) -> &'static str {
        match self {
            SensorType::Unknown => "unknown",
            SensorType::Accelerometer => "accel",
            SensorType::Geomagnetic => "geomag",
            SensorType::Light => "light",
            SensorType::Proximity => "proxi",
            SensorType::Thermometer => "thermo",
            SensorType::Gyroscope => "gyro",
            SensorType::Pressure => "pressure",
            SensorType::Motion => "motion",
            SensorType::Fusion => "fusion",
            SensorType::Pedometer => "pedo",
            SensorType::Context => "context",
            SensorType::Flat => "flat",
            SensorType::Bio => "bio",
            SensorType::BioHrm => "bio_hrm",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:x})", self.label(), self.as_raw())
    }
}

/// Event type: sensor in the upper 16 bits, event bit in the lower 16 bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EventType(pub u32);

impl EventType {
    const SENSOR_SHIFT: u32 = 16;
    const EVENT_MASK: u32 = 0xFFFF;

    /// Build an event type from a sensor and an event bit
    pub const fn new(sensor: SensorType, bit: u32) -> Self {
        Self(((sensor as u32) << Self::SENSOR_SHIFT) | (bit & Self::EVENT_MASK))
    }

    /// Raw sensor bits of this event type
    #[inline]
    pub fn sensor_raw(self) -> u32 {
        self.0 >> Self::SENSOR_SHIFT
    }

    /// Sensor this event belongs to, if known
    pub fn sensor(self) -> Option<SensorType> {
        SensorType::from_raw(self.sensor_raw())
    }

    /// Lower 16 event bits
    #[inline]
    pub fn bits(self) -> u32 {
        self.0 & Self::EVENT_MASK
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType(0x{:x})", self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Well-known event types
pub mod events {
    use super::{EventType, SensorType};

    pub const ACCEL_ROTATION_CHECK: EventType = EventType::new(SensorType::Accelerometer, 0x0001);
    pub const ACCEL_CALIBRATION_NEEDED: EventType =
        EventType::new(SensorType::Accelerometer, 0x0002);
    pub const ACCEL_SET_HORIZON: EventType = EventType::new(SensorType::Accelerometer, 0x0004);
    pub const ACCEL_SET_WAKEUP: EventType = EventType::new(SensorType::Accelerometer, 0x0008);
    pub const ACCEL_RAW_DATA: EventType = EventType::new(SensorType::Accelerometer, 0x0010);
    pub const ACCEL_ORIENTATION_DATA: EventType =
        EventType::new(SensorType::Accelerometer, 0x0040);
    pub const ACCEL_LINEAR_ACCELERATION_DATA: EventType =
        EventType::new(SensorType::Accelerometer, 0x0080);
    pub const ACCEL_GRAVITY_DATA: EventType = EventType::new(SensorType::Accelerometer, 0x0100);

    pub const GEOMAG_CALIBRATION_NEEDED: EventType =
        EventType::new(SensorType::Geomagnetic, 0x0001);
    pub const GEOMAG_ATTITUDE_DATA: EventType = EventType::new(SensorType::Geomagnetic, 0x0002);
    pub const GEOMAG_RAW_DATA: EventType = EventType::new(SensorType::Geomagnetic, 0x0004);

    pub const LIGHT_LUX_DATA: EventType = EventType::new(SensorType::Light, 0x0001);
    pub const LIGHT_LEVEL_DATA: EventType = EventType::new(SensorType::Light, 0x0002);

    pub const PROXIMITY_CHANGE_STATE: EventType = EventType::new(SensorType::Proximity, 0x0001);
    pub const PROXIMITY_DISTANCE_DATA: EventType = EventType::new(SensorType::Proximity, 0x0002);

    pub const CONTEXT_REPORT: EventType = EventType::new(SensorType::Context, 0x0001);
}

/// Delivery context stamped on every event at dispatch time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Situation {
    #[default]
    LcdOn = 0,
    LcdOff = 1,
    SurvivalMode = 2,
}

impl Situation {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Situation::LcdOn),
            1 => Some(Situation::LcdOff),
            2 => Some(Situation::SurvivalMode),
            _ => None,
        }
    }

    #[inline]
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Situation::LcdOn => write!(f, "LCD on"),
            Situation::LcdOff => write!(f, "LCD off"),
            Situation::SurvivalMode => write!(f, "survival mode"),
        }
    }
}

/// Per-sensor delivery option flags set by SET_OPTION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SensorOption(pub i32);

impl SensorOption {
    /// Deliver only while the display is on
    pub const DEFAULT: SensorOption = SensorOption(0);
    /// Also deliver while the display is off
    pub const ON_IN_SCREEN_OFF: SensorOption = SensorOption(1);
    /// Also deliver in survival (power-save) mode
    pub const ON_IN_POWERSAVE_MODE: SensorOption = SensorOption(2);
    /// Deliver in every situation
    pub const ALWAYS_ON: SensorOption = SensorOption(3);

    #[inline]
    pub fn contains(self, other: SensorOption) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Whether a client with these options receives events in `situation`
    pub fn permits(self, situation: Situation) -> bool {
        match situation {
            Situation::LcdOn => true,
            Situation::LcdOff => self.contains(Self::ON_IN_SCREEN_OFF),
            Situation::SurvivalMode => self.contains(Self::ON_IN_POWERSAVE_MODE),
        }
    }
}

/// Accuracy reported with sensor data
pub mod accuracy {
    pub const UNDEFINED: i32 = -1;
    pub const BAD: i32 = 0;
    pub const NORMAL: i32 = 1;
    pub const GOOD: i32 = 2;
    pub const VERY_GOOD: i32 = 3;
}

/// Unit indices reported with sensor data
pub mod unit {
    pub const UNDEFINED: i32 = 0;
    pub const METRE_PER_SECOND_SQUARED: i32 = 1;
    pub const MICRO_TESLA: i32 = 2;
    pub const DEGREE: i32 = 3;
    pub const LUX: i32 = 4;
    pub const CENTIMETER: i32 = 5;
    pub const LEVEL_1_TO_10: i32 = 6;
    pub const STATE_ON_OFF: i32 = 7;
    pub const DEGREE_PER_SECOND: i32 = 8;
    pub const HECTOPASCAL: i32 = 9;
    pub const CELSIUS: i32 = 10;
    pub const METER: i32 = 11;
    pub const STEP: i32 = 12;
    pub const VENDOR_UNIT: i32 = 100;
}

/// Fixed-size data struct returned by `get_struct_value`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaseData {
    pub accuracy: i32,
    pub unit_idx: i32,
    pub timestamp: u64,
    pub values_num: i32,
    pub values: [f32; MAX_VALUE_SIZE],
}

impl BaseData {
    /// Build a data struct from a slice of values (truncated to `MAX_VALUE_SIZE`)
    pub fn from_values(timestamp: u64, unit_idx: i32, values: &[f32]) -> Self {
        let mut data = BaseData {
            accuracy: accuracy::NORMAL,
            unit_idx,
            timestamp,
            ..Default::default()
        };
        let n = values.len().min(MAX_VALUE_SIZE);
        data.values[..n].copy_from_slice(&values[..n]);
        data.values_num = n as i32;
        data
    }
}

/// Fixed-size property struct returned by `get_property`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseProperty {
    pub unit_idx: i32,
    pub min_range: f32,
    pub max_range: f32,
    pub resolution: f32,
    /// Sensor name, at most `MAX_KEY_LEN - 1` bytes on the wire
    pub name: String,
    /// Vendor name, at most `MAX_KEY_LEN - 1` bytes on the wire
    pub vendor: String,
}

/// A plain sensor event
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorEvent {
    pub event_type: EventType,
    pub situation: Situation,
    pub timestamp: u64,
    pub accuracy: i32,
    pub unit_idx: i32,
    pub values_num: i32,
    pub values: [f32; MAX_VALUE_SIZE],
}

impl SensorEvent {
    /// Create an event carrying `data` under `event_type`
    pub fn from_data(event_type: EventType, data: &BaseData) -> Self {
        Self {
            event_type,
            situation: Situation::default(),
            timestamp: data.timestamp,
            accuracy: data.accuracy,
            unit_idx: data.unit_idx,
            values_num: data.values_num,
            values: data.values,
        }
    }

    /// Create a value-less notification event
    pub fn notification(event_type: EventType, timestamp: u64) -> Self {
        Self {
            event_type,
            timestamp,
            ..Default::default()
        }
    }
}

/// An event produced by a co-processor (sensor hub)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorHubEvent {
    pub event_type: EventType,
    pub situation: Situation,
    pub version: i32,
    pub sensorhub: i32,
    pub kind: i32,
    pub timestamp: i64,
    /// Opaque hub payload, at most `HUB_DATA_MAX_SIZE` bytes
    pub hub_data: Vec<u8>,
    pub data: [f32; HUB_FLOAT_COUNT],
}

/// Monotonic timestamp in microseconds
pub fn monotonic_timestamp_us() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}
