//! Minimal blocking clients for both server sockets

use sensord_rs::protocol::{
    encode_packet, read_packet, ClientPayload, CommandId, DoneReply, EventChannelReady,
    EventFrameKind, EventPayload, GetIdPayload, GetPropertyPayload, GetStructPayload, Packet,
    PacketHeader, PropertyReply, SensorPayload, SensorhubDataPayload, SetIntervalPayload,
    SetOptionPayload, SetValuePayload, StructReply, Wire, EVENT_FRAME_HEADER_SIZE,
};
use sensord_rs::types::{ClientId, EventType, SensorEvent, SensorHubEvent, SensorType};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use super::test_timeout;

/// Whether the peer closed `stream`; waits up to the read timeout
fn peer_closed(stream: &mut UnixStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() == ErrorKind::ConnectionReset,
    }
}

/// Command channel client
pub struct CommandClient {
    stream: UnixStream,
}

impl CommandClient {
    pub fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).expect("command socket should accept");
        stream.set_read_timeout(Some(test_timeout())).unwrap();
        Self { stream }
    }

    /// Send a raw packet; `None` when the server closed the connection
    pub fn request_raw(&mut self, cmd: u32, payload: &[u8]) -> Option<Packet> {
        let mut packet = PacketHeader {
            cmd,
            size: payload.len() as u32,
        }
        .to_bytes();
        packet.extend_from_slice(payload);
        if self.stream.write_all(&packet).is_err() {
            return None;
        }
        read_packet(&mut self.stream, usize::MAX).ok().flatten()
    }

    pub fn request(&mut self, cmd: CommandId, payload: &impl Wire) -> Packet {
        self.stream
            .write_all(&encode_packet(cmd, payload))
            .expect("request should be sent");
        read_packet(&mut self.stream, usize::MAX)
            .expect("reply should be readable")
            .expect("server should reply before closing")
    }

    pub fn done(&mut self, cmd: CommandId, payload: &impl Wire) -> DoneReply {
        let reply = self.request(cmd, payload);
        assert_eq!(reply.cmd, CommandId::Done.as_raw());
        DoneReply::from_bytes(&reply.payload).unwrap()
    }

    pub fn get_id(&mut self) -> ClientId {
        let reply = self.done(CommandId::GetId, &GetIdPayload { pid: std::process::id() as i32 });
        assert_eq!(reply.value, 0);
        reply.client_id
    }

    pub fn hello(&mut self, client_id: ClientId, sensor: SensorType) -> i64 {
        let payload = SensorPayload {
            client_id,
            sensor: sensor.as_raw(),
        };
        self.done(CommandId::Hello, &payload).value
    }

    pub fn byebye(&mut self, client_id: ClientId, sensor: SensorType) -> i64 {
        let payload = SensorPayload {
            client_id,
            sensor: sensor.as_raw(),
        };
        self.done(CommandId::Byebye, &payload).value
    }

    pub fn start(&mut self, client_id: ClientId, sensor: SensorType) -> i64 {
        let payload = SensorPayload {
            client_id,
            sensor: sensor.as_raw(),
        };
        self.done(CommandId::Start, &payload).value
    }

    pub fn stop(&mut self, client_id: ClientId) -> i64 {
        self.done(CommandId::Stop, &ClientPayload { client_id }).value
    }

    pub fn register(&mut self, client_id: ClientId, event_type: EventType) -> i64 {
        self.done(CommandId::Register, &EventPayload { client_id, event_type })
            .value
    }

    pub fn unregister(&mut self, client_id: ClientId, event_type: EventType) -> i64 {
        self.done(CommandId::Unregister, &EventPayload { client_id, event_type })
            .value
    }

    pub fn check_event(&mut self, client_id: ClientId, event_type: EventType) -> i64 {
        self.done(CommandId::CheckEvent, &EventPayload { client_id, event_type })
            .value
    }

    pub fn set_interval(&mut self, client_id: ClientId, sensor: SensorType, interval_ms: u32) -> i64 {
        let payload = SetIntervalPayload {
            client_id,
            sensor: sensor.as_raw(),
            interval_ms,
        };
        self.done(CommandId::SetInterval, &payload).value
    }

    pub fn unset_interval(&mut self, client_id: ClientId, sensor: SensorType) -> i64 {
        let payload = SensorPayload {
            client_id,
            sensor: sensor.as_raw(),
        };
        self.done(CommandId::UnsetInterval, &payload).value
    }

    pub fn set_option(&mut self, client_id: ClientId, sensor: SensorType, option: i32) -> i64 {
        let payload = SetOptionPayload {
            client_id,
            sensor: sensor.as_raw(),
            option,
        };
        self.done(CommandId::SetOption, &payload).value
    }

    pub fn set_value(&mut self, client_id: ClientId, property: i32, value: i64) -> i64 {
        let payload = SetValuePayload {
            client_id,
            sensor: 0,
            property,
            value,
        };
        self.done(CommandId::SetValue, &payload).value
    }

    pub fn get_property(&mut self, client_id: ClientId) -> PropertyReply {
        let reply = self.request(CommandId::GetProperty, &GetPropertyPayload { client_id, level: 0 });
        assert_eq!(reply.cmd, CommandId::GetProperty.as_raw());
        PropertyReply::from_bytes(&reply.payload).unwrap()
    }

    pub fn get_struct(&mut self, client_id: ClientId) -> StructReply {
        let reply = self.request(CommandId::GetStruct, &GetStructPayload { client_id, data_id: 0 });
        assert_eq!(reply.cmd, CommandId::GetStruct.as_raw());
        StructReply::from_bytes(&reply.payload).unwrap()
    }

    pub fn send_sensorhub_data(&mut self, client_id: ClientId, data: &[u8]) -> i64 {
        let payload = SensorhubDataPayload {
            client_id,
            data: data.to_vec(),
        };
        self.done(CommandId::SendSensorhubData, &payload).value
    }

    /// Whether the server has closed this connection
    pub fn is_closed(&mut self) -> bool {
        peer_closed(&mut self.stream)
    }
}

/// Event channel client
pub struct EventClient {
    stream: UnixStream,
    pub ready: EventChannelReady,
}

impl EventClient {
    /// Connect and run the handshake for `client_id`
    pub fn connect(path: &Path, client_id: ClientId) -> Self {
        let mut stream = UnixStream::connect(path).expect("event socket should accept");
        stream.set_read_timeout(Some(test_timeout())).unwrap();
        stream.write_all(&client_id.to_le_bytes()).unwrap();
        let mut raw = [0u8; EventChannelReady::SIZE];
        stream.read_exact(&mut raw).expect("handshake reply");
        let ready = EventChannelReady::from_bytes(&raw).unwrap();
        Self { stream, ready }
    }

    /// Next frame of any kind, or `None` if none arrives within `timeout`
    fn next_frame(&mut self, timeout: Duration) -> Option<(Option<EventFrameKind>, Vec<u8>)> {
        if timeout.is_zero() {
            return None;
        }
        self.stream.set_read_timeout(Some(timeout)).ok()?;
        let mut header = [0u8; EVENT_FRAME_HEADER_SIZE];
        if self.stream.read_exact(&mut header).is_err() {
            return None;
        }
        let kind = u32::from_le_bytes(header[..4].try_into().unwrap());
        let size = u32::from_le_bytes(header[4..].try_into().unwrap()) as usize;
        let mut body = vec![0u8; size];
        self.stream.set_read_timeout(Some(test_timeout())).ok()?;
        self.stream.read_exact(&mut body).ok()?;
        Some((EventFrameKind::from_raw(kind), body))
    }

    /// Next plain sensor event, or `None` if none arrives within `timeout`
    pub fn next_event(&mut self, timeout: Duration) -> Option<SensorEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (kind, body) = self.next_frame(remaining)?;
            if kind == Some(EventFrameKind::Sensor) {
                return SensorEvent::from_bytes(&body).ok();
            }
        }
    }

    /// Next sensor-hub event, or `None` if none arrives within `timeout`
    pub fn next_hub_event(&mut self, timeout: Duration) -> Option<SensorHubEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (kind, body) = self.next_frame(remaining)?;
            if kind == Some(EventFrameKind::SensorHub) {
                return SensorHubEvent::from_bytes(&body).ok();
            }
        }
    }

    /// Every event received during `window`
    pub fn collect_for(&mut self, window: Duration) -> Vec<SensorEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.next_event(remaining) {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    /// Whether the server has closed this channel
    pub fn is_closed(&mut self) -> bool {
        peer_closed(&mut self.stream)
    }
}
