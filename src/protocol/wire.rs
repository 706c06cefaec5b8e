//! Little-endian wire codec
//!
//! All structs crossing a socket are encoded field by field in little-endian
//! order with no padding. Fixed-size strings are NUL padded.

use crate::error::{Result, SensordError};
use crate::types::{
    BaseData, BaseProperty, EventType, SensorEvent, SensorHubEvent, Situation,
    HUB_DATA_MAX_SIZE, HUB_FLOAT_COUNT, MAX_KEY_LEN, MAX_VALUE_SIZE,
};

/// Encoded size of [`SensorEvent`]
pub const SENSOR_EVENT_SIZE: usize = 4 + 4 + 8 + 4 + 4 + 4 + MAX_VALUE_SIZE * 4;

/// Encoded size of [`SensorHubEvent`]
pub const SENSORHUB_EVENT_SIZE: usize = 6 * 4 + 8 + HUB_DATA_MAX_SIZE + HUB_FLOAT_COUNT * 4;

/// Encoded size of [`BaseData`]
pub const BASE_DATA_SIZE: usize = 4 + 4 + 8 + 4 + MAX_VALUE_SIZE * 4;

/// Encoded size of [`BaseProperty`]
pub const BASE_PROPERTY_SIZE: usize = 4 + 3 * 4 + 2 * MAX_KEY_LEN;

/// Append-only encoder
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write `bytes` into a field of exactly `width` bytes, zero padded
    pub fn put_padded(&mut self, bytes: &[u8], width: usize) {
        let n = bytes.len().min(width);
        self.buf.extend_from_slice(&bytes[..n]);
        self.buf.resize(self.buf.len() + (width - n), 0);
    }

    /// NUL-terminated string in a field of `width` bytes
    pub fn put_fixed_str(&mut self, s: &str, width: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(width.saturating_sub(1));
        self.put_padded(&bytes[..n], width);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SensordError::Protocol(format!(
                "Truncated payload: need {} more bytes, have {}",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// NUL-terminated string in a field of `width` bytes
    pub fn get_fixed_str(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Fail if bytes are left over
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(SensordError::Protocol(format!(
                "{} unexpected trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// A value with a fixed wire encoding
pub trait Wire: Sized {
    fn encode(&self, w: &mut WireWriter);

    fn decode(r: &mut WireReader<'_>) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode a whole buffer; trailing bytes are an error
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let value = Self::decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

fn put_values(w: &mut WireWriter, values: &[f32]) {
    for v in values {
        w.put_f32(*v);
    }
}

fn get_values<const N: usize>(r: &mut WireReader<'_>) -> Result<[f32; N]> {
    let mut values = [0f32; N];
    for v in values.iter_mut() {
        *v = r.get_f32()?;
    }
    Ok(values)
}

fn get_situation(r: &mut WireReader<'_>) -> Result<Situation> {
    let raw = r.get_i32()?;
    Situation::from_raw(raw)
        .ok_or_else(|| SensordError::Protocol(format!("Unknown situation {}", raw)))
}

impl Wire for SensorEvent {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.event_type.0);
        w.put_i32(self.situation.as_raw());
        w.put_u64(self.timestamp);
        w.put_i32(self.accuracy);
        w.put_i32(self.unit_idx);
        w.put_i32(self.values_num);
        put_values(w, &self.values);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            event_type: EventType(r.get_u32()?),
            situation: get_situation(r)?,
            timestamp: r.get_u64()?,
            accuracy: r.get_i32()?,
            unit_idx: r.get_i32()?,
            values_num: r.get_i32()?,
            values: get_values(r)?,
        })
    }
}

impl Wire for SensorHubEvent {
    fn encode(&self, w: &mut WireWriter) {
        let size = self.hub_data.len().min(HUB_DATA_MAX_SIZE);
        w.put_u32(self.event_type.0);
        w.put_i32(self.situation.as_raw());
        w.put_i32(self.version);
        w.put_i32(self.sensorhub);
        w.put_i32(self.kind);
        w.put_i32(size as i32);
        w.put_i64(self.timestamp);
        w.put_padded(&self.hub_data[..size], HUB_DATA_MAX_SIZE);
        put_values(w, &self.data);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let event_type = EventType(r.get_u32()?);
        let situation = get_situation(r)?;
        let version = r.get_i32()?;
        let sensorhub = r.get_i32()?;
        let kind = r.get_i32()?;
        let size = r.get_i32()?;
        let timestamp = r.get_i64()?;
        let raw = r.take(HUB_DATA_MAX_SIZE)?;
        let size = usize::try_from(size)
            .ok()
            .filter(|&s| s <= HUB_DATA_MAX_SIZE)
            .ok_or_else(|| SensordError::Protocol(format!("Invalid hub data size {}", size)))?;
        Ok(Self {
            event_type,
            situation,
            version,
            sensorhub,
            kind,
            timestamp,
            hub_data: raw[..size].to_vec(),
            data: get_values(r)?,
        })
    }
}

impl Wire for BaseData {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.accuracy);
        w.put_i32(self.unit_idx);
        w.put_u64(self.timestamp);
        w.put_i32(self.values_num);
        put_values(w, &self.values);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            accuracy: r.get_i32()?,
            unit_idx: r.get_i32()?,
            timestamp: r.get_u64()?,
            values_num: r.get_i32()?,
            values: get_values(r)?,
        })
    }
}

impl Wire for BaseProperty {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.unit_idx);
        w.put_f32(self.min_range);
        w.put_f32(self.max_range);
        w.put_f32(self.resolution);
        w.put_fixed_str(&self.name, MAX_KEY_LEN);
        w.put_fixed_str(&self.vendor, MAX_KEY_LEN);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            unit_idx: r.get_i32()?,
            min_range: r.get_f32()?,
            max_range: r.get_f32()?,
            resolution: r.get_f32()?,
            name: r.get_fixed_str(MAX_KEY_LEN)?,
            vendor: r.get_fixed_str(MAX_KEY_LEN)?,
        })
    }
}
