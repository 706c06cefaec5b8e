//! Integration tests for the command and event channels
//!
//! These tests run a full server over the simulated modules and talk to it
//! through real Unix sockets:
//! - Client lifecycle from GET_ID to BYEBYE
//! - Start refcounting and interval arbitration across clients
//! - Event fan-out, unsubscription and last-event replay
//! - Sensor-hub commands, GET_STRUCT and processor chaining
//! - Error replies and connection teardown

#![cfg(feature = "mock-sensor")]

mod common;

use common::{wait_until, ConfigBuilder, TestServer};
use sensord_rs::error::{OP_ERROR, OP_SUCCESS};
use sensord_rs::mock::hub::{instruction, HUB_ID};
use sensord_rs::mock::rotation;
use sensord_rs::protocol::{CommandId, DoneReply, Wire, EVENT_CHANNEL_MAGIC};
use sensord_rs::types::{
    events, unit, SensorType, DEFAULT_POLLING_INTERVAL_MS, HUB_DATA_MAX_SIZE,
};
use serial_test::serial;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;

const ACCEL: SensorType = SensorType::Accelerometer;
const GEOMAG: SensorType = SensorType::Geomagnetic;
const CONTEXT: SensorType = SensorType::Context;

#[test]
#[serial]
fn test_full_client_scenario() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);
    let mut cmd = server.command();

    let id = cmd.get_id();
    assert!(id >= 0);
    let mut events_rx = server.events(id);
    assert_eq!(events_rx.ready.magic, EVENT_CHANNEL_MAGIC);
    assert_eq!(events_rx.ready.client_id, id);

    assert_eq!(cmd.hello(id, ACCEL), OP_SUCCESS);
    assert_eq!(cmd.register(id, events::ACCEL_RAW_DATA), OP_SUCCESS);
    assert_eq!(cmd.set_interval(id, ACCEL, 100), OP_SUCCESS);
    assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);
    assert_eq!(processor.effective_interval(), 100);
    assert!(processor.is_active());

    let received = events_rx.collect_for(Duration::from_millis(1000));
    assert!(
        (3..=15).contains(&received.len()),
        "expected roughly 10 events at 100ms, got {}",
        received.len()
    );
    assert!(received.iter().all(|e| e.event_type == events::ACCEL_RAW_DATA));
    assert!(received.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    assert_eq!(cmd.stop(id), OP_SUCCESS);
    assert!(!processor.is_active());
    assert_eq!(cmd.byebye(id, ACCEL), OP_SUCCESS);
    assert!(cmd.is_closed());

    assert!(wait_until(|| !server.server.sessions().has_client(id)));
    assert_eq!(processor.client_count(events::ACCEL_RAW_DATA), 0);
    assert_eq!(processor.effective_interval(), DEFAULT_POLLING_INTERVAL_MS);
    assert!(events_rx.next_event(Duration::from_millis(300)).is_none());
}

#[test]
fn test_unknown_client_id_is_rejected() {
    let server = TestServer::start();
    let mut cmd = server.command();

    assert_eq!(cmd.hello(42, ACCEL), OP_ERROR);
    assert_eq!(cmd.start(42, ACCEL), OP_ERROR);
    assert_eq!(cmd.register(42, events::ACCEL_RAW_DATA), OP_ERROR);
    assert_eq!(cmd.stop(42), OP_ERROR);

    // The connection stays usable
    let id = cmd.get_id();
    assert_eq!(cmd.hello(id, ACCEL), OP_SUCCESS);
}

#[test]
fn test_start_refcount_across_clients() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);

    let mut clients: Vec<_> = (0..3)
        .map(|_| {
            let mut cmd = server.command();
            let id = cmd.get_id();
            assert_eq!(cmd.hello(id, ACCEL), OP_SUCCESS);
            assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);
            (cmd, id)
        })
        .collect();
    assert_eq!(processor.start_count(), 3);

    for (cmd, id) in clients.iter_mut().take(2) {
        assert_eq!(cmd.stop(*id), OP_SUCCESS);
    }
    assert!(processor.is_active());

    let (cmd, id) = &mut clients[2];
    assert_eq!(cmd.stop(*id), OP_SUCCESS);
    assert!(!processor.is_active());
    assert_eq!(cmd.stop(*id), OP_ERROR);
}

#[test]
fn test_second_start_on_one_connection_is_not_counted() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);
    assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);
    assert_eq!(processor.start_count(), 1);
    assert_eq!(cmd.stop(id), OP_SUCCESS);
    assert!(!processor.is_active());
}

#[test]
fn test_interval_arbitration() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);

    let mut clients: Vec<_> = [200, 100, 50]
        .into_iter()
        .map(|interval| {
            let mut cmd = server.command();
            let id = cmd.get_id();
            cmd.hello(id, ACCEL);
            assert_eq!(cmd.set_interval(id, ACCEL, interval), OP_SUCCESS);
            (cmd, id)
        })
        .collect();
    assert_eq!(processor.effective_interval(), 50);

    let (cmd, id) = &mut clients[2];
    assert_eq!(cmd.unset_interval(*id, ACCEL), OP_SUCCESS);
    assert_eq!(processor.effective_interval(), 100);
    assert_eq!(cmd.unset_interval(*id, ACCEL), OP_ERROR);

    for (cmd, id) in clients.iter_mut().take(2) {
        assert_eq!(cmd.unset_interval(*id, ACCEL), OP_SUCCESS);
    }
    assert_eq!(processor.effective_interval(), DEFAULT_POLLING_INTERVAL_MS);
}

#[test]
fn test_zero_interval_is_rejected() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    assert_eq!(cmd.set_interval(id, ACCEL, 0), OP_ERROR);
    assert_eq!(processor.effective_interval(), DEFAULT_POLLING_INTERVAL_MS);
}

#[test]
fn test_unregister_is_idempotent_error() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    assert_eq!(cmd.register(id, events::ACCEL_RAW_DATA), OP_SUCCESS);
    assert_eq!(cmd.register(id, events::ACCEL_RAW_DATA), OP_ERROR);
    assert_eq!(cmd.unregister(id, events::ACCEL_GRAVITY_DATA), OP_ERROR);
    assert_eq!(processor.client_count(events::ACCEL_RAW_DATA), 1);

    assert_eq!(cmd.unregister(id, events::ACCEL_RAW_DATA), OP_SUCCESS);
    assert_eq!(cmd.unregister(id, events::ACCEL_RAW_DATA), OP_ERROR);
    assert_eq!(processor.client_count(events::ACCEL_RAW_DATA), 0);
}

#[test]
fn test_unsupported_event_is_rejected() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    assert_eq!(cmd.check_event(id, events::ACCEL_ROTATION_CHECK), OP_SUCCESS);
    assert_eq!(cmd.check_event(id, events::LIGHT_LUX_DATA), OP_ERROR);
    assert_eq!(cmd.register(id, events::LIGHT_LUX_DATA), OP_ERROR);
}

#[test]
fn test_hello_for_unserved_sensor_discards_client() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();

    assert_eq!(cmd.hello(id, SensorType::Gyroscope), OP_ERROR);
    assert!(!server.server.sessions().has_client(id));
}

#[test]
fn test_get_property_round_trip() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    let reply = cmd.get_property(id);
    assert_eq!(reply.state, 0);
    let expected = server.processor(ACCEL).get_property(0).unwrap();
    assert_eq!(reply.property, expected);
    assert_eq!(reply.property.name, "accel_sensor");
}

#[test]
fn test_get_property_before_hello_fails() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();

    let reply = cmd.get_property(id);
    assert_eq!(reply.state as i64, OP_ERROR);
}

#[test]
fn test_set_value_reaches_sensor() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    assert_eq!(cmd.set_value(id, sensord_rs::mock::PROPERTY_SET_WAKEUP, 1), 0);
    assert_eq!(cmd.set_value(id, 0x7f, 1), -1);
}

#[test]
fn test_set_option_is_validated() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    cmd.hello(id, ACCEL);

    assert_eq!(cmd.set_option(id, ACCEL, 7), OP_ERROR);
    assert_eq!(cmd.set_option(id, ACCEL, 3), OP_SUCCESS);
    assert_eq!(
        server.server.sessions().get_option(id, ACCEL).map(|o| o.0),
        Some(3)
    );
}

#[test]
fn test_invalid_command_keeps_connection() {
    let server = TestServer::start();
    let mut cmd = server.command();

    for raw in [0u32, CommandId::Done.as_raw(), CommandId::LAST, 0x40] {
        let reply = cmd.request_raw(raw, &[]).expect("reply to invalid command");
        assert_eq!(reply.cmd, CommandId::Done.as_raw());
        let done = DoneReply::from_bytes(&reply.payload).unwrap();
        assert_eq!(done.client_id, -1);
        assert_eq!(done.value, OP_ERROR);
    }
    assert!(cmd.get_id() >= 0);
}

#[test]
fn test_truncated_payload_closes_connection() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();

    let reply = cmd
        .request_raw(CommandId::Hello.as_raw(), &id.to_le_bytes())
        .expect("error reply before teardown");
    let done = DoneReply::from_bytes(&reply.payload).unwrap();
    assert_eq!(done.value, OP_ERROR);
    assert!(cmd.is_closed());
    assert!(wait_until(|| !server.server.sessions().has_client(id)));
}

#[test]
fn test_oversized_payload_closes_without_reply() {
    let server = TestServer::start();
    let mut stream = UnixStream::connect(server.server.command_socket()).unwrap();
    stream
        .set_read_timeout(Some(common::test_timeout()))
        .unwrap();

    let mut header = CommandId::Hello.as_raw().to_le_bytes().to_vec();
    header.extend_from_slice(&(1u32 << 30).to_le_bytes());
    stream.write_all(&header).unwrap();

    let mut buf = [0u8; 8];
    let n = std::io::Read::read(&mut stream, &mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
#[serial]
fn test_fan_out_and_unregister() {
    let server = TestServer::start();

    let mut a = server.command();
    let a_id = a.get_id();
    let mut a_events = server.events(a_id);
    let mut b = server.command();
    let b_id = b.get_id();
    let mut b_events = server.events(b_id);

    for (cmd, id) in [(&mut a, a_id), (&mut b, b_id)] {
        assert_eq!(cmd.hello(id, ACCEL), OP_SUCCESS);
        assert_eq!(cmd.register(id, events::ACCEL_RAW_DATA), OP_SUCCESS);
        assert_eq!(cmd.set_interval(id, ACCEL, 20), OP_SUCCESS);
        assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);
    }

    assert!(a_events.next_event(common::test_timeout()).is_some());
    assert!(b_events.next_event(common::test_timeout()).is_some());

    assert_eq!(a.unregister(a_id, events::ACCEL_RAW_DATA), OP_SUCCESS);
    // Drain what was dispatched before the unregistration
    a_events.collect_for(Duration::from_millis(200));
    assert!(a_events.collect_for(Duration::from_millis(200)).is_empty());
    assert!(!b_events.collect_for(Duration::from_millis(200)).is_empty());
}

#[test]
#[serial]
fn test_late_subscriber_gets_cached_rotation() {
    let server = TestServer::with_config(
        ConfigBuilder::new().stateful_events(vec![events::ACCEL_ROTATION_CHECK.0]),
    );

    let mut first = server.command();
    let first_id = first.get_id();
    let mut first_events = server.events(first_id);
    first.hello(first_id, ACCEL);
    first.register(first_id, events::ACCEL_ROTATION_CHECK);
    first.set_interval(first_id, ACCEL, 20);
    assert_eq!(first.start(first_id, ACCEL), OP_SUCCESS);

    let rotation_event = first_events
        .next_event(common::test_timeout())
        .expect("rotation event");
    assert_eq!(rotation_event.event_type, events::ACCEL_ROTATION_CHECK);
    assert_eq!(rotation_event.values[0] as i32, rotation::PORTRAIT_TOP);
    assert!(wait_until(|| server
        .server
        .dispatcher()
        .last_event(events::ACCEL_ROTATION_CHECK)
        .is_some()));

    // The rotation does not change again, so only the replay reaches the
    // second client
    let mut second = server.command();
    let second_id = second.get_id();
    let mut second_events = server.events(second_id);
    second.hello(second_id, ACCEL);
    second.register(second_id, events::ACCEL_ROTATION_CHECK);
    assert_eq!(second.start(second_id, ACCEL), OP_SUCCESS);

    let replayed = second_events
        .next_event(common::test_timeout())
        .expect("replayed rotation");
    assert_eq!(replayed.event_type, events::ACCEL_ROTATION_CHECK);
    assert_eq!(replayed.values[0] as i32, rotation::PORTRAIT_TOP);
}

#[test]
#[serial]
fn test_disconnect_releases_everything() {
    let server = TestServer::start();
    let processor = server.processor(ACCEL);

    let id = {
        let mut cmd = server.command();
        let id = cmd.get_id();
        cmd.hello(id, ACCEL);
        cmd.register(id, events::ACCEL_RAW_DATA);
        cmd.register(id, events::ACCEL_SET_WAKEUP);
        cmd.set_interval(id, ACCEL, 50);
        assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);
        assert!(processor.is_active());
        id
    };

    assert!(wait_until(|| !processor.is_active()));
    assert!(wait_until(|| !server.server.sessions().has_client(id)));
    assert_eq!(processor.client_count(events::ACCEL_RAW_DATA), 0);
    assert_eq!(processor.client_count(events::ACCEL_SET_WAKEUP), 0);
    assert_eq!(processor.effective_interval(), DEFAULT_POLLING_INTERVAL_MS);
}

#[test]
fn test_event_channel_for_unknown_client_is_closed() {
    let server = TestServer::start();
    let mut stream = UnixStream::connect(server.server.event_socket()).unwrap();
    stream
        .set_read_timeout(Some(common::test_timeout()))
        .unwrap();
    stream.write_all(&99i32.to_le_bytes()).unwrap();

    let mut buf = [0u8; 8];
    let n = std::io::Read::read(&mut stream, &mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn test_connection_limit() {
    let server = TestServer::with_config(ConfigBuilder::new().max_connections(1));
    let mut held = server.command();
    assert!(held.get_id() >= 0);

    let mut refused = server.command();
    assert!(refused.request_raw(CommandId::GetId.as_raw(), &0i32.to_le_bytes()).is_none());

    drop(held);
    assert!(wait_until(|| {
        let mut cmd = server.command();
        cmd.request_raw(CommandId::GetId.as_raw(), &0i32.to_le_bytes())
            .is_some()
    }));
}

#[test]
fn test_get_struct_round_trip() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    assert_eq!(cmd.hello(id, ACCEL), OP_SUCCESS);
    assert_eq!(cmd.start(id, ACCEL), OP_SUCCESS);

    let reply = cmd.get_struct(id);
    assert_eq!(reply.state as i64, OP_SUCCESS);
    assert_eq!(reply.client_id, id);
    assert_eq!(reply.data.unit_idx, unit::METRE_PER_SECOND_SQUARED);
    assert_eq!(reply.data.values_num, 3);
    assert!((reply.data.values[1] - 9.8).abs() < 0.2, "{:?}", reply.data);
    assert_eq!(cmd.stop(id), OP_SUCCESS);
}

#[test]
fn test_get_struct_before_hello_fails() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();

    let reply = cmd.get_struct(id);
    assert_eq!(reply.state as i64, OP_ERROR);
    assert_eq!(reply.client_id, id);
    assert_eq!(reply.data.values_num, 0);
    assert_eq!(cmd.hello(id, ACCEL), OP_SUCCESS);
}

#[test]
#[serial]
fn test_sensorhub_command_reported_to_subscriber() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    let mut events_rx = server.events(id);

    assert_eq!(cmd.hello(id, CONTEXT), OP_SUCCESS);
    assert_eq!(cmd.register(id, events::CONTEXT_REPORT), OP_SUCCESS);
    assert_eq!(cmd.set_interval(id, CONTEXT, 20), OP_SUCCESS);
    assert_eq!(cmd.start(id, CONTEXT), OP_SUCCESS);

    let command = [instruction::LIB_ADD, 19, 0, 0];
    assert_eq!(cmd.send_sensorhub_data(id, &command), OP_SUCCESS);
    let event = events_rx
        .next_hub_event(common::test_timeout())
        .expect("hub event for the command");
    assert_eq!(event.event_type, events::CONTEXT_REPORT);
    assert_eq!(event.sensorhub, HUB_ID);
    assert_eq!(event.hub_data, command);

    assert_eq!(cmd.stop(id), OP_SUCCESS);
    assert!(!server.processor(CONTEXT).is_active());
}

#[test]
#[serial]
fn test_sensorhub_data_size_limit() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();
    let mut events_rx = server.events(id);
    cmd.hello(id, CONTEXT);
    cmd.register(id, events::CONTEXT_REPORT);
    cmd.set_interval(id, CONTEXT, 20);
    assert_eq!(cmd.start(id, CONTEXT), OP_SUCCESS);

    let largest = vec![0x42u8; HUB_DATA_MAX_SIZE];
    assert_eq!(cmd.send_sensorhub_data(id, &largest), OP_SUCCESS);
    let event = events_rx
        .next_hub_event(common::test_timeout())
        .expect("hub event for the largest command");
    assert_eq!(event.hub_data.len(), HUB_DATA_MAX_SIZE);

    let mut payload = id.to_le_bytes().to_vec();
    payload.extend_from_slice(&(HUB_DATA_MAX_SIZE as i32 + 1).to_le_bytes());
    payload.extend_from_slice(&[0x42; 16]);
    let reply = cmd
        .request_raw(CommandId::SendSensorhubData.as_raw(), &payload)
        .expect("error reply before teardown");
    assert_eq!(reply.cmd, CommandId::Done.as_raw());
    assert_eq!(DoneReply::from_bytes(&reply.payload).unwrap().value, OP_ERROR);
    assert!(cmd.is_closed());
}

#[test]
fn test_sensorhub_data_to_plain_sensor_fails() {
    let server = TestServer::start();
    let mut cmd = server.command();
    let id = cmd.get_id();

    assert_eq!(cmd.send_sensorhub_data(id, &[instruction::LIB_ADD, 19]), OP_ERROR);
    cmd.hello(id, ACCEL);
    assert_eq!(cmd.send_sensorhub_data(id, &[instruction::LIB_ADD, 19]), -1);
    assert!(cmd.get_id() >= 0);
}

#[test]
#[serial]
fn test_geomag_client_drives_accel_interval() {
    let server = TestServer::start();
    let accel = server.processor(ACCEL);
    let geo = server.processor(GEOMAG);
    let mut cmd = server.command();
    let id = cmd.get_id();
    let mut events_rx = server.events(id);

    assert_eq!(cmd.hello(id, GEOMAG), OP_SUCCESS);
    assert_eq!(cmd.register(id, events::GEOMAG_ATTITUDE_DATA), OP_SUCCESS);
    assert_eq!(cmd.set_interval(id, GEOMAG, 100), OP_SUCCESS);
    assert_eq!(cmd.start(id, GEOMAG), OP_SUCCESS);
    assert_eq!(geo.effective_interval(), 100);
    assert_eq!(accel.start_count(), 1);
    assert_eq!(accel.client_count(events::ACCEL_RAW_DATA), 1);
    assert_eq!(accel.effective_interval(), 100);

    let event = events_rx
        .next_event(common::test_timeout())
        .expect("attitude event");
    assert_eq!(event.event_type, events::GEOMAG_ATTITUDE_DATA);
    assert_eq!(event.values_num, 3);

    // A direct accelerometer client still wins with a shorter interval
    let mut direct = server.command();
    let direct_id = direct.get_id();
    direct.hello(direct_id, ACCEL);
    assert_eq!(direct.set_interval(direct_id, ACCEL, 50), OP_SUCCESS);
    assert_eq!(direct.start(direct_id, ACCEL), OP_SUCCESS);
    assert_eq!(accel.start_count(), 2);
    assert_eq!(accel.effective_interval(), 50);
    assert_eq!(direct.stop(direct_id), OP_SUCCESS);
    assert_eq!(direct.unset_interval(direct_id, ACCEL), OP_SUCCESS);
    assert_eq!(accel.effective_interval(), 100);

    assert_eq!(cmd.stop(id), OP_SUCCESS);
    assert!(!geo.is_active());
    assert_eq!(accel.start_count(), 0);
    assert_eq!(accel.client_count(events::ACCEL_RAW_DATA), 0);
    assert_eq!(accel.effective_interval(), DEFAULT_POLLING_INTERVAL_MS);
}
