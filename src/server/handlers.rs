//! Command handlers
//!
//! [`HANDLERS`] maps every command id to its handler. A handler decodes its
//! payload, checks the client id against the session registry (every
//! command except GET_ID) and returns the reply. Errors are turned into the
//! command's reply shape with an error status by [`handle_packet`].

use super::connection::ConnectionContext;
use super::ServerState;
use crate::error::{Result, SensordError, OP_ERROR, OP_SUCCESS};
use crate::processor::{IntervalKind, Processor};
use crate::protocol::{
    ClientPayload, CommandId, EventPayload, GetIdPayload, GetPropertyPayload, GetStructPayload,
    PropertyReply, Reply, SensorPayload, SensorhubDataPayload, SetIntervalPayload,
    SetOptionPayload, SetValuePayload, StructReply, Wire,
};
use crate::protocol::Packet;
use crate::types::{
    BaseData, BaseProperty, ClientId, SensorOption, SensorType, CLIENT_ID_INVALID,
};
use std::sync::Arc;

type Handler = fn(&ServerState, &mut ConnectionContext, &[u8]) -> Result<Reply>;

/// Handlers indexed by command id; `None` for ids that are not requests
static HANDLERS: [Option<Handler>; CommandId::LAST as usize] = [
    None,                     // NONE
    Some(get_id),             // GET_ID
    Some(hello),              // HELLO
    Some(byebye),             // BYEBYE
    None,                     // WAIT_EVENT
    None,                     // DONE
    Some(start),              // START
    Some(stop),               // STOP
    Some(register_event),     // REG
    Some(unregister_event),   // UNREG
    Some(check_event),        // CHECK_EVENT
    Some(set_option),         // SET_OPTION
    Some(set_interval),       // SET_INTERVAL
    Some(unset_interval),     // UNSET_INTERVAL
    Some(set_value),          // SET_VALUE
    Some(get_property),       // GET_PROPERTY
    Some(get_struct),         // GET_STRUCT
    Some(send_sensorhub_data), // SEND_SENSORHUB_DATA
];

/// Run the handler for `packet`. Returns the reply and whether the
/// connection must be torn down after sending it.
pub fn handle_packet(
    state: &ServerState,
    ctx: &mut ConnectionContext,
    packet: &Packet,
) -> (Reply, bool) {
    let handler = CommandId::in_handler_range(packet.cmd)
        .then(|| HANDLERS[packet.cmd as usize])
        .flatten();
    let Some(handler) = handler else {
        tracing::error!("Invalid command id {:#x}", packet.cmd);
        return (Reply::done(CLIENT_ID_INVALID, OP_ERROR), false);
    };

    match handler(state, ctx, &packet.payload) {
        Ok(reply) => (reply, false),
        Err(e) => {
            let client_id = peek_client_id(packet);
            if e.is_fatal_to_connection() {
                tracing::error!("Command {:#x} from client[{}]: {}", packet.cmd, client_id, e);
            } else {
                tracing::warn!("Command {:#x} from client[{}]: {}", packet.cmd, client_id, e);
            }
            (
                error_reply(packet.cmd, client_id, &e),
                e.is_fatal_to_connection(),
            )
        }
    }
}

/// Client id leading the payload, for replies to undecodable commands
fn peek_client_id(packet: &Packet) -> ClientId {
    if packet.cmd == CommandId::GetId.as_raw() {
        return CLIENT_ID_INVALID;
    }
    packet
        .payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(ClientId::from_le_bytes)
        .unwrap_or(CLIENT_ID_INVALID)
}

fn error_reply(cmd: u32, client_id: ClientId, error: &SensordError) -> Reply {
    let state = error.status() as i32;
    match CommandId::from_raw(cmd) {
        Some(CommandId::GetProperty) => Reply::Property(PropertyReply {
            state,
            property: BaseProperty::default(),
        }),
        Some(CommandId::GetStruct) => Reply::Struct(StructReply {
            client_id,
            state,
            data: BaseData::default(),
        }),
        _ => Reply::done(client_id, error.status()),
    }
}

fn status(ok: bool) -> i64 {
    if ok {
        OP_SUCCESS
    } else {
        OP_ERROR
    }
}

/// Check that `client_id` was issued and belongs to this connection
fn authorize(state: &ServerState, ctx: &mut ConnectionContext, client_id: ClientId) -> Result<()> {
    if !state.sessions.has_client(client_id) {
        return Err(SensordError::Session(format!("Unknown client[{}]", client_id)));
    }
    if ctx.has_client() && ctx.client_id != client_id {
        return Err(SensordError::Session(format!(
            "client[{}] on a connection of client[{}]",
            client_id, ctx.client_id
        )));
    }
    ctx.client_id = client_id;
    Ok(())
}

/// Head processor of the stream bound by HELLO
fn bound_processor(ctx: &ConnectionContext) -> Result<Arc<Processor>> {
    ctx.stream
        .as_ref()
        .and_then(|stream| stream.processor())
        .cloned()
        .ok_or_else(|| {
            SensordError::Session(format!(
                "client[{}] has no stream bound, HELLO first",
                ctx.client_id
            ))
        })
}

fn sensor_from_raw(raw: u32) -> Result<SensorType> {
    SensorType::from_raw(raw)
        .filter(|s| *s != SensorType::Unknown)
        .ok_or_else(|| SensordError::Session(format!("Unknown sensor {:#x}", raw)))
}

fn get_id(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = GetIdPayload::from_bytes(payload)?;
    let client_id = state.sessions.create_client();
    state.sessions.bind_pid(client_id, payload.pid);
    if ctx.has_client() {
        tracing::warn!(
            "Connection of client[{}] requested a new id, now client[{}]",
            ctx.client_id,
            client_id
        );
    }
    ctx.client_id = client_id;
    tracing::info!("New client id [{}] for pid {}", client_id, payload.pid);
    Ok(Reply::done(client_id, OP_SUCCESS))
}

fn hello(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SensorPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let client_id = payload.client_id;
    let sensor = sensor_from_raw(payload.sensor)?;

    let Some(stream) = state.streams.lookup_sensor(sensor) else {
        if !state.sessions.has_usage(client_id) {
            state.sessions.remove_client(client_id);
        }
        return Err(SensordError::Session(format!("No stream serves {}", sensor)));
    };
    if ctx.sensor.is_some_and(|bound| bound != sensor) {
        return Err(SensordError::Session(format!(
            "client[{}] is already bound to {:?} on this connection",
            client_id, ctx.sensor
        )));
    }

    state.sessions.create_sensor_usage(client_id, sensor);
    tracing::info!(
        "{} bound to {} ({})",
        state.sessions.client_info(client_id),
        stream.name(),
        sensor
    );
    ctx.stream = Some(stream);
    ctx.sensor = Some(sensor);
    Ok(Reply::done(client_id, OP_SUCCESS))
}

fn byebye(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SensorPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let client_id = payload.client_id;
    ctx.finished = true;

    tracing::info!("BYEBYE from client[{}] for sensor {:#x}", client_id, payload.sensor);
    let removed = sensor_from_raw(payload.sensor)
        .map(|sensor| state.sessions.remove_sensor_usage(client_id, sensor))
        .unwrap_or(false);
    if removed && ctx.sensor.map(|s| s.as_raw()) == Some(payload.sensor) {
        ctx.sensor = None;
    }
    if !removed {
        tracing::error!("client[{}] had no usage of sensor {:#x}", client_id, payload.sensor);
    }
    Ok(Reply::done(client_id, status(removed)))
}

fn start(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SensorPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;

    if ctx.started {
        tracing::warn!("client[{}] already started {}", payload.client_id, processor.name());
        return Ok(Reply::done(payload.client_id, OP_SUCCESS));
    }
    processor.start()?;
    ctx.started = true;

    let sensor = SensorType::from_raw(payload.sensor)
        .or(ctx.sensor)
        .unwrap_or_else(|| processor.sensor_type());
    state.dispatcher.request_last_event(payload.client_id, sensor);
    Ok(Reply::done(payload.client_id, OP_SUCCESS))
}

fn stop(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = ClientPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;

    if !ctx.started {
        return Err(SensordError::Session(format!(
            "client[{}] never started {}",
            payload.client_id,
            processor.name()
        )));
    }
    processor.stop()?;
    ctx.started = false;
    Ok(Reply::done(payload.client_id, OP_SUCCESS))
}

fn register_event(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = EventPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let (client_id, event_type) = (payload.client_id, payload.event_type);

    if !processor.is_supported(event_type) {
        return Err(SensordError::Session(format!(
            "Event {} is not supported by {}",
            event_type,
            processor.name()
        )));
    }
    if !state.sessions.register_event(client_id, event_type) {
        return Err(SensordError::Session(format!(
            "client[{}] cannot register event {}",
            client_id, event_type
        )));
    }
    if let Err(e) = processor.add_client(event_type) {
        state.sessions.unregister_event(client_id, event_type);
        return Err(e);
    }
    ctx.registered.insert(event_type);
    tracing::debug!("Registered event {} for client[{}]", event_type, client_id);
    Ok(Reply::done(client_id, OP_SUCCESS))
}

fn unregister_event(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = EventPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let (client_id, event_type) = (payload.client_id, payload.event_type);

    if !state.sessions.unregister_event(client_id, event_type) {
        return Err(SensordError::Session(format!(
            "Event {} is not registered for client[{}]",
            event_type, client_id
        )));
    }
    ctx.registered.remove(&event_type);
    processor.delete_client(event_type)?;
    tracing::debug!("Unregistered event {} for client[{}]", event_type, client_id);
    Ok(Reply::done(client_id, OP_SUCCESS))
}

fn check_event(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = EventPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let supported = processor.is_supported(payload.event_type);
    tracing::debug!(
        "Event {} {} by {}",
        payload.event_type,
        if supported { "is supported" } else { "is not supported" },
        processor.name()
    );
    Ok(Reply::done(payload.client_id, status(supported)))
}

fn set_interval(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SetIntervalPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let client_id = payload.client_id;
    let sensor = sensor_from_raw(payload.sensor)?;

    if payload.interval_ms == 0 {
        return Err(SensordError::Session("Interval must be positive".to_string()));
    }
    let Some(previous) = state.sessions.get_interval(client_id, sensor) else {
        return Err(SensordError::Session(format!(
            "client[{}] has no usage of {}",
            client_id, sensor
        )));
    };
    state.sessions.set_interval(client_id, sensor, payload.interval_ms);
    if let Err(e) = processor.add_interval(client_id, payload.interval_ms, IntervalKind::Client) {
        state.sessions.set_interval(client_id, sensor, previous);
        return Err(e);
    }
    Ok(Reply::done(client_id, OP_SUCCESS))
}

fn unset_interval(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SensorPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let client_id = payload.client_id;
    let sensor = sensor_from_raw(payload.sensor)?;

    let Some(previous) = state.sessions.get_interval(client_id, sensor) else {
        return Err(SensordError::Session(format!(
            "client[{}] has no usage of {}",
            client_id, sensor
        )));
    };
    processor.delete_interval(client_id, IntervalKind::Client)?;
    state.sessions.set_interval(client_id, sensor, 0);
    tracing::debug!("client[{}] retracted its {}ms interval", client_id, previous);
    Ok(Reply::done(client_id, OP_SUCCESS))
}

fn set_option(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SetOptionPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let sensor = sensor_from_raw(payload.sensor)?;
    if !(SensorOption::DEFAULT.0..=SensorOption::ALWAYS_ON.0).contains(&payload.option) {
        return Err(SensordError::Session(format!("Invalid option {}", payload.option)));
    }
    let ok = state
        .sessions
        .set_option(payload.client_id, sensor, SensorOption(payload.option));
    if !ok {
        return Err(SensordError::Session(format!(
            "client[{}] has no usage of {}",
            payload.client_id, sensor
        )));
    }
    Ok(Reply::done(payload.client_id, OP_SUCCESS))
}

fn set_value(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SetValuePayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let value = processor.set_cmd(payload.sensor, payload.property, payload.value);
    tracing::info!(
        "SET_VALUE {:#x}={} on {} returned {}",
        payload.property,
        payload.value,
        processor.name(),
        value
    );
    Ok(Reply::done(payload.client_id, value))
}

fn get_property(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = GetPropertyPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let property = processor.get_property(payload.level)?;
    Ok(Reply::Property(PropertyReply {
        state: OP_SUCCESS as i32,
        property,
    }))
}

fn get_struct(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = GetStructPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let data = processor.get_struct_value(payload.data_id)?;
    Ok(Reply::Struct(StructReply {
        client_id: payload.client_id,
        state: OP_SUCCESS as i32,
        data,
    }))
}

fn send_sensorhub_data(state: &ServerState, ctx: &mut ConnectionContext, payload: &[u8]) -> Result<Reply> {
    let payload = SensorhubDataPayload::from_bytes(payload)?;
    authorize(state, ctx, payload.client_id)?;
    let processor = bound_processor(ctx)?;
    let result = processor.send_sensorhub_data(&payload.data);
    tracing::info!(
        "Forwarded {} bytes to {}: {}",
        payload.data.len(),
        processor.name(),
        result
    );
    Ok(Reply::done(payload.client_id, result as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DoneReply, Payload};

    #[test]
    fn test_every_request_has_a_handler() {
        for raw in 1..CommandId::LAST {
            let cmd = CommandId::from_raw(raw).unwrap();
            let expected = !matches!(cmd, CommandId::WaitEvent | CommandId::Done);
            assert_eq!(HANDLERS[raw as usize].is_some(), expected, "{:?}", cmd);
        }
    }

    #[test]
    fn test_peek_client_id() {
        let payload = SensorPayload {
            client_id: 12,
            sensor: 1,
        };
        let packet = Packet {
            cmd: CommandId::Hello.as_raw(),
            payload: payload.to_bytes(),
        };
        assert_eq!(peek_client_id(&packet), payload.client_id());

        let short = Packet {
            cmd: CommandId::Hello.as_raw(),
            payload: vec![1, 2],
        };
        assert_eq!(peek_client_id(&short), CLIENT_ID_INVALID);
    }

    #[test]
    fn test_error_reply_shapes() {
        let err = SensordError::Session("x".into());
        assert!(matches!(
            error_reply(CommandId::GetProperty.as_raw(), 3, &err),
            Reply::Property(PropertyReply { state: -1, .. })
        ));
        assert!(matches!(
            error_reply(CommandId::GetStruct.as_raw(), 3, &err),
            Reply::Struct(StructReply { client_id: 3, state: -1, .. })
        ));
        assert_eq!(
            error_reply(CommandId::Start.as_raw(), 3, &err),
            Reply::Done(DoneReply {
                client_id: 3,
                value: OP_ERROR
            })
        );
    }
}
