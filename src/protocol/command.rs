//! Command ids, payloads and replies

use super::wire::{Wire, WireReader, WireWriter};
use crate::error::{Result, SensordError};
use crate::types::{BaseData, BaseProperty, ClientId, EventType, HUB_DATA_MAX_SIZE};

/// Command identifiers carried in the packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandId {
    None = 0,
    GetId = 1,
    Hello = 2,
    Byebye = 3,
    WaitEvent = 4,
    Done = 5,
    Start = 6,
    Stop = 7,
    Register = 8,
    Unregister = 9,
    CheckEvent = 0x0A,
    SetOption = 0x0B,
    SetInterval = 0x0C,
    UnsetInterval = 0x0D,
    SetValue = 0x0E,
    GetProperty = 0x0F,
    GetStruct = 0x10,
    SendSensorhubData = 0x11,
}

impl CommandId {
    /// One past the highest command id; valid handler ids are `1..LAST`
    pub const LAST: u32 = 0x12;

    pub fn from_raw(raw: u32) -> Option<Self> {
        use CommandId::*;
        Some(match raw {
            0 => None,
            1 => GetId,
            2 => Hello,
            3 => Byebye,
            4 => WaitEvent,
            5 => Done,
            6 => Start,
            7 => Stop,
            8 => Register,
            9 => Unregister,
            0x0A => CheckEvent,
            0x0B => SetOption,
            0x0C => SetInterval,
            0x0D => UnsetInterval,
            0x0E => SetValue,
            0x0F => GetProperty,
            0x10 => GetStruct,
            0x11 => SendSensorhubData,
            _ => return Option::None,
        })
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Whether `raw` lies in the handler range
    pub fn in_handler_range(raw: u32) -> bool {
        raw > CommandId::None as u32 && raw < Self::LAST
    }
}

/// Fixed packet header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub cmd: u32,
    pub size: u32,
}

impl PacketHeader {
    pub const SIZE: usize = 8;

    pub fn new(cmd: CommandId, size: usize) -> Self {
        Self {
            cmd: cmd.as_raw(),
            size: size as u32,
        }
    }
}

impl Wire for PacketHeader {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.cmd);
        w.put_u32(self.size);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            cmd: r.get_u32()?,
            size: r.get_u32()?,
        })
    }
}

/// Encode a header plus payload
pub fn encode_packet(cmd: CommandId, payload: &impl Wire) -> Vec<u8> {
    let body = payload.to_bytes();
    let mut w = WireWriter::with_capacity(PacketHeader::SIZE + body.len());
    PacketHeader::new(cmd, body.len()).encode(&mut w);
    w.put_bytes(&body);
    w.into_bytes()
}

/// Payload of a command, with the command it belongs to
pub trait Payload: Wire {
    fn client_id(&self) -> ClientId;
}

macro_rules! payload {
    (
        $(#[$meta:meta])*
        $name:ident { $($field:ident : $ty:ty => $put:ident / $get:ident),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub client_id: ClientId,
            $(pub $field: $ty,)*
        }

        impl Wire for $name {
            fn encode(&self, w: &mut WireWriter) {
                w.put_i32(self.client_id);
                $(w.$put(self.$field);)*
            }

            fn decode(r: &mut WireReader<'_>) -> Result<Self> {
                Ok(Self {
                    client_id: r.get_i32()?,
                    $($field: r.$get()?,)*
                })
            }
        }

        impl Payload for $name {
            fn client_id(&self) -> ClientId {
                self.client_id
            }
        }
    };
}

/// GET_ID: the only command sent before a client id exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetIdPayload {
    pub pid: i32,
}

impl Wire for GetIdPayload {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.pid);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self { pid: r.get_i32()? })
    }
}

payload! {
    /// HELLO, BYEBYE, START and UNSET_INTERVAL
    SensorPayload { sensor: u32 => put_u32 / get_u32 }
}

payload! {
    /// STOP
    ClientPayload {}
}

/// REG, UNREG and CHECK_EVENT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPayload {
    pub client_id: ClientId,
    pub event_type: EventType,
}

impl Wire for EventPayload {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.client_id);
        w.put_u32(self.event_type.0);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            client_id: r.get_i32()?,
            event_type: EventType(r.get_u32()?),
        })
    }
}

impl Payload for EventPayload {
    fn client_id(&self) -> ClientId {
        self.client_id
    }
}

payload! {
    /// SET_INTERVAL
    SetIntervalPayload {
        sensor: u32 => put_u32 / get_u32,
        interval_ms: u32 => put_u32 / get_u32,
    }
}

payload! {
    /// SET_OPTION
    SetOptionPayload {
        sensor: u32 => put_u32 / get_u32,
        option: i32 => put_i32 / get_i32,
    }
}

payload! {
    /// SET_VALUE
    SetValuePayload {
        sensor: i32 => put_i32 / get_i32,
        property: i32 => put_i32 / get_i32,
        value: i64 => put_i64 / get_i64,
    }
}

payload! {
    /// GET_PROPERTY
    GetPropertyPayload { level: u32 => put_u32 / get_u32 }
}

payload! {
    /// GET_STRUCT
    GetStructPayload { data_id: u32 => put_u32 / get_u32 }
}

/// Size of the largest fixed-layout command payload (SET_VALUE)
pub const LARGEST_FIXED_PAYLOAD: usize = 4 + 4 + 4 + 8;

/// SEND_SENSORHUB_DATA: the one variable-length payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorhubDataPayload {
    pub client_id: ClientId,
    pub data: Vec<u8>,
}

impl Wire for SensorhubDataPayload {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.client_id);
        w.put_i32(self.data.len() as i32);
        w.put_bytes(&self.data);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let client_id = r.get_i32()?;
        let len = r.get_i32()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|&l| l <= HUB_DATA_MAX_SIZE)
            .ok_or_else(|| SensordError::Protocol(format!("Invalid sensorhub data length {}", len)))?;
        Ok(Self {
            client_id,
            data: r.take(len)?.to_vec(),
        })
    }
}

impl Payload for SensorhubDataPayload {
    fn client_id(&self) -> ClientId {
        self.client_id
    }
}

/// Generic status reply (CMD_DONE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneReply {
    pub client_id: ClientId,
    pub value: i64,
}

impl Wire for DoneReply {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.client_id);
        w.put_i64(self.value);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            client_id: r.get_i32()?,
            value: r.get_i64()?,
        })
    }
}

/// GET_PROPERTY reply
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyReply {
    pub state: i32,
    pub property: BaseProperty,
}

impl Wire for PropertyReply {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.state);
        self.property.encode(w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            state: r.get_i32()?,
            property: BaseProperty::decode(r)?,
        })
    }
}

/// GET_STRUCT reply
#[derive(Debug, Clone, PartialEq)]
pub struct StructReply {
    pub client_id: ClientId,
    pub state: i32,
    pub data: BaseData,
}

impl Wire for StructReply {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.client_id);
        w.put_i32(self.state);
        self.data.encode(w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            client_id: r.get_i32()?,
            state: r.get_i32()?,
            data: BaseData::decode(r)?,
        })
    }
}

/// The single reply sent for a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done(DoneReply),
    Property(PropertyReply),
    Struct(StructReply),
}

impl Reply {
    pub fn done(client_id: ClientId, value: i64) -> Self {
        Reply::Done(DoneReply { client_id, value })
    }

    /// Reply status as seen by the client
    pub fn status(&self) -> i64 {
        match self {
            Reply::Done(done) => done.value,
            Reply::Property(reply) => reply.state as i64,
            Reply::Struct(reply) => reply.state as i64,
        }
    }

    pub fn to_packet(&self) -> Vec<u8> {
        match self {
            Reply::Done(done) => encode_packet(CommandId::Done, done),
            Reply::Property(reply) => encode_packet(CommandId::GetProperty, reply),
            Reply::Struct(reply) => encode_packet(CommandId::GetStruct, reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::events;

    #[test]
    fn test_command_id_range() {
        assert!(!CommandId::in_handler_range(0));
        assert!(CommandId::in_handler_range(CommandId::GetId.as_raw()));
        assert!(CommandId::in_handler_range(CommandId::SendSensorhubData.as_raw()));
        assert!(!CommandId::in_handler_range(CommandId::LAST));
        assert_eq!(CommandId::from_raw(0x0C), Some(CommandId::SetInterval));
        assert_eq!(CommandId::from_raw(0x40), None);
    }

    #[test]
    fn test_packet_framing() {
        let packet = encode_packet(
            CommandId::Register,
            &EventPayload {
                client_id: 7,
                event_type: events::ACCEL_RAW_DATA,
            },
        );
        let header = PacketHeader::from_bytes(&packet[..PacketHeader::SIZE]).unwrap();
        assert_eq!(header.cmd, CommandId::Register.as_raw());
        assert_eq!(header.size, 8);
        let payload = EventPayload::from_bytes(&packet[PacketHeader::SIZE..]).unwrap();
        assert_eq!(payload.client_id(), 7);
    }

    #[test]
    fn test_macro_payload_layout() {
        let payload = SetValuePayload {
            client_id: 3,
            sensor: 1,
            property: 2,
            value: -5,
        };
        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), 4 + 4 + 4 + 8);
        assert_eq!(SetValuePayload::from_bytes(&bytes).unwrap(), payload);
        assert_eq!(ClientPayload { client_id: 9 }.to_bytes(), 9i32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_largest_fixed_payload() {
        let sizes = [
            GetIdPayload { pid: 1 }.to_bytes().len(),
            SensorPayload { client_id: 1, sensor: 1 }.to_bytes().len(),
            EventPayload { client_id: 1, event_type: EventType(1) }.to_bytes().len(),
            SetIntervalPayload { client_id: 1, sensor: 1, interval_ms: 1 }.to_bytes().len(),
            SetOptionPayload { client_id: 1, sensor: 1, option: 1 }.to_bytes().len(),
            GetPropertyPayload { client_id: 1, level: 1 }.to_bytes().len(),
            GetStructPayload { client_id: 1, data_id: 1 }.to_bytes().len(),
        ];
        assert!(sizes.iter().all(|&s| s < LARGEST_FIXED_PAYLOAD));
        let set_value = SetValuePayload { client_id: 1, sensor: 1, property: 1, value: 1 };
        assert_eq!(set_value.to_bytes().len(), LARGEST_FIXED_PAYLOAD);
    }

    #[test]
    fn test_sensorhub_length_checked() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&(HUB_DATA_MAX_SIZE as i32 + 1).to_le_bytes());
        assert!(SensorhubDataPayload::from_bytes(&bytes).is_err());

        let payload = SensorhubDataPayload {
            client_id: 1,
            data: vec![0xAA; 16],
        };
        assert_eq!(SensorhubDataPayload::from_bytes(&payload.to_bytes()).unwrap(), payload);
    }

    #[test]
    fn test_reply_packets() {
        let packet = Reply::done(4, -1).to_packet();
        let header = PacketHeader::from_bytes(&packet[..PacketHeader::SIZE]).unwrap();
        assert_eq!(header.cmd, CommandId::Done.as_raw());
        assert_eq!(header.size as usize, packet.len() - PacketHeader::SIZE);
        let done = DoneReply::from_bytes(&packet[PacketHeader::SIZE..]).unwrap();
        assert_eq!(done.value, -1);
    }
}
