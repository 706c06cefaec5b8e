//! Client/server wire protocol
//!
//! # Command channel
//!
//! Request/reply over a stream socket. Every request is a [`PacketHeader`]
//! (command id, payload size) followed by the payload; every request gets
//! exactly one reply packet framed the same way:
//!
//! ```text
//! +--------+--------+------------------+
//! | cmd u32| size u32| payload (size)  |
//! +--------+--------+------------------+
//! ```
//!
//! # Event channel
//!
//! After the handshake (client sends its id as an `i32`, server answers with
//! [`EventChannelReady`]) the server pushes events. Each event is framed with
//! an [`EventFrameKind`] tag and its size so clients can tell plain events
//! from sensor-hub events on a byte stream.
//!
//! # Transient errors
//!
//! `EINTR` and `EWOULDBLOCK` are retried up to [`MAX_IO_RETRIES`] times in a
//! row. Short reads and writes continue where they stopped.

pub mod command;
pub mod wire;

pub use command::{
    encode_packet, ClientPayload, CommandId, DoneReply, EventPayload, GetIdPayload,
    GetPropertyPayload, GetStructPayload, PacketHeader, Payload, PropertyReply, Reply,
    SensorPayload, SensorhubDataPayload, SetIntervalPayload, SetOptionPayload, SetValuePayload,
    StructReply, LARGEST_FIXED_PAYLOAD,
};
pub use wire::{Wire, WireReader, WireWriter};

use crate::error::{Result, SensordError};
use crate::types::{ClientId, SensorEvent, SensorHubEvent};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Magic value opening the event channel reply
pub const EVENT_CHANNEL_MAGIC: u32 = 0xCAFE_CAFE;

/// Consecutive transient errors tolerated before giving up
pub const MAX_IO_RETRIES: usize = 5;

/// Pause between retries of a would-block error
const RETRY_PAUSE: Duration = Duration::from_millis(2);

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Fill `buf` completely. Returns `Ok(false)` on end of stream before the
/// first byte, an `UnexpectedEof` error on end of stream mid-buffer.
pub fn read_full(stream: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    let mut retries = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {} of {} bytes", filled, buf.len()),
                ))
            }
            Ok(n) => {
                filled += n;
                retries = 0;
            }
            Err(e) if is_transient(&e) && retries < MAX_IO_RETRIES => {
                retries += 1;
                if e.kind() == io::ErrorKind::WouldBlock {
                    std::thread::sleep(RETRY_PAUSE);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Write all of `buf`, retrying transient errors a bounded number of times
pub fn write_full(stream: &mut impl Write, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    let mut retries = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer stopped accepting data",
                ))
            }
            Ok(n) => {
                written += n;
                retries = 0;
            }
            Err(e) if is_transient(&e) && retries < MAX_IO_RETRIES => {
                retries += 1;
                if e.kind() == io::ErrorKind::WouldBlock {
                    std::thread::sleep(RETRY_PAUSE);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// A received command packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: u32,
    pub payload: Vec<u8>,
}

/// Read one packet. `Ok(None)` means the peer closed the connection cleanly.
pub fn read_packet(stream: &mut impl Read, max_payload: usize) -> Result<Option<Packet>> {
    let mut raw = [0u8; PacketHeader::SIZE];
    if !read_full(stream, &mut raw).map_err(|e| SensordError::Protocol(format!("Header read failed: {}", e)))? {
        return Ok(None);
    }
    let header = PacketHeader::from_bytes(&raw)?;
    let size = header.size as usize;
    if size > max_payload {
        return Err(SensordError::Protocol(format!(
            "Payload of {} bytes exceeds the {} byte limit",
            size, max_payload
        )));
    }
    let mut payload = vec![0u8; size];
    if size > 0 && !read_full(stream, &mut payload).map_err(|e| SensordError::Protocol(format!("Payload read failed: {}", e)))? {
        return Err(SensordError::Protocol("Connection closed before payload".to_string()));
    }
    Ok(Some(Packet {
        cmd: header.cmd,
        payload,
    }))
}

/// Write a fully encoded packet
pub fn write_packet(stream: &mut impl Write, packet: &[u8]) -> Result<()> {
    write_full(stream, packet)?;
    Ok(())
}

/// Reply closing the event channel handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventChannelReady {
    pub magic: u32,
    pub client_id: ClientId,
}

impl EventChannelReady {
    pub const SIZE: usize = 8;

    pub fn new(client_id: ClientId) -> Self {
        Self {
            magic: EVENT_CHANNEL_MAGIC,
            client_id,
        }
    }
}

impl Wire for EventChannelReady {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.magic);
        w.put_i32(self.client_id);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            magic: r.get_u32()?,
            client_id: r.get_i32()?,
        })
    }
}

/// Tag of a pushed event frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventFrameKind {
    Sensor = 1,
    SensorHub = 2,
}

impl EventFrameKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(EventFrameKind::Sensor),
            2 => Some(EventFrameKind::SensorHub),
            _ => None,
        }
    }
}

/// Size of the tag and length preceding each pushed event
pub const EVENT_FRAME_HEADER_SIZE: usize = 8;

fn encode_frame(kind: EventFrameKind, body: Vec<u8>) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(EVENT_FRAME_HEADER_SIZE + body.len());
    w.put_u32(kind as u32);
    w.put_u32(body.len() as u32);
    w.put_bytes(&body);
    w.into_bytes()
}

/// Frame a plain sensor event for the event channel
pub fn encode_sensor_event_frame(event: &SensorEvent) -> Vec<u8> {
    encode_frame(EventFrameKind::Sensor, event.to_bytes())
}

/// Frame a sensor-hub event for the event channel
pub fn encode_hub_event_frame(event: &SensorHubEvent) -> Vec<u8> {
    encode_frame(EventFrameKind::SensorHub, event.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::events;
    use std::io::Cursor;

    /// Reader that fails with `Interrupted` a fixed number of times first
    struct Flaky {
        inner: Cursor<Vec<u8>>,
        interruptions: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interruptions > 0 {
                self.interruptions -= 1;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            // One byte at a time to exercise short reads
            let n = buf.len().min(1);
            self.inner.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_read_packet_roundtrip() {
        let packet = encode_packet(CommandId::GetId, &GetIdPayload { pid: 1234 });
        let mut reader = Flaky {
            inner: Cursor::new(packet),
            interruptions: 2,
        };
        let packet = read_packet(&mut reader, 64).unwrap().unwrap();
        assert_eq!(packet.cmd, CommandId::GetId.as_raw());
        assert_eq!(GetIdPayload::from_bytes(&packet.payload).unwrap().pid, 1234);
        assert!(read_packet(&mut reader, 64).unwrap().is_none());
    }

    #[test]
    fn test_too_many_interruptions_fail() {
        let mut reader = Flaky {
            inner: Cursor::new(vec![0; 8]),
            interruptions: MAX_IO_RETRIES + 1,
        };
        assert!(read_packet(&mut reader, 64).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&CommandId::SendSensorhubData.as_raw().to_le_bytes());
        raw.extend_from_slice(&100_000u32.to_le_bytes());
        let err = read_packet(&mut Cursor::new(raw), 4104).unwrap_err();
        assert!(err.is_fatal_to_connection());
    }

    #[test]
    fn test_truncated_header_is_error() {
        let err = read_packet(&mut Cursor::new(vec![1, 0, 0]), 64).unwrap_err();
        assert!(matches!(err, SensordError::Protocol(_)));
    }

    #[test]
    fn test_event_frame_header() {
        let frame = encode_sensor_event_frame(&SensorEvent::notification(events::ACCEL_RAW_DATA, 0));
        assert_eq!(&frame[0..4], &1u32.to_le_bytes());
        assert_eq!(
            u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize,
            wire::SENSOR_EVENT_SIZE
        );
        assert_eq!(frame.len(), EVENT_FRAME_HEADER_SIZE + wire::SENSOR_EVENT_SIZE);
    }

    #[test]
    fn test_handshake_reply_layout() {
        let bytes = EventChannelReady::new(7).to_bytes();
        assert_eq!(bytes.len(), EventChannelReady::SIZE);
        assert_eq!(&bytes[0..4], &EVENT_CHANNEL_MAGIC.to_le_bytes());
    }
}
