//! Session Registry
//!
//! Per-client state shared by the command server and the dispatcher:
//! identity, sensor usages (registered events, interval, option flags) and
//! the client's event channel. One lock guards the whole map; every method
//! holds it only for the duration of a map operation.

pub mod record;

pub use record::{ClientRecord, SensorUsage};

use crate::event::EventSocket;
use crate::types::{ClientId, EventType, SensorOption, SensorType, Situation};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Registry of connected clients
#[derive(Debug, Default)]
pub struct SessionRegistry {
    clients: Mutex<HashMap<ClientId, ClientRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientRecord>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_usage<R>(
        &self,
        client_id: ClientId,
        sensor: SensorType,
        f: impl FnOnce(&mut SensorUsage) -> R,
    ) -> Option<R> {
        self.clients()
            .get_mut(&client_id)
            .and_then(|record| record.usages.get_mut(&sensor))
            .map(f)
    }

    /// Allocate the lowest free client id
    pub fn create_client(&self) -> ClientId {
        let mut clients = self.clients();
        let client_id = (0..)
            .find(|id| !clients.contains_key(id))
            .unwrap_or(ClientId::MAX);
        clients.insert(client_id, ClientRecord::new(client_id));
        tracing::debug!("Created client[{}]", client_id);
        client_id
    }

    pub fn bind_pid(&self, client_id: ClientId, pid: i32) -> bool {
        match self.clients().get_mut(&client_id) {
            Some(record) => {
                record.pid = Some(pid);
                true
            }
            None => false,
        }
    }

    pub fn has_client(&self, client_id: ClientId) -> bool {
        self.clients().contains_key(&client_id)
    }

    /// Destroy a client record, closing its event channel
    pub fn remove_client(&self, client_id: ClientId) -> bool {
        match self.clients().remove(&client_id) {
            Some(record) => {
                tracing::info!("Removed {}", record.info());
                true
            }
            None => false,
        }
    }

    /// Destroy a client record only if it has no sensor usage left
    pub fn remove_client_if_unused(&self, client_id: ClientId) -> bool {
        let mut clients = self.clients();
        let unused = clients
            .get(&client_id)
            .map(|record| !record.has_usage())
            .unwrap_or(false);
        if unused {
            if let Some(record) = clients.remove(&client_id) {
                tracing::info!("Removed {} with no sensor usage", record.info());
            }
        }
        unused
    }

    pub fn client_info(&self, client_id: ClientId) -> String {
        self.clients()
            .get(&client_id)
            .map(|record| record.info())
            .unwrap_or_else(|| format!("client[{}] (unknown)", client_id))
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    // ---- sensor usage ----

    /// Start using `sensor`; an existing usage is kept as is
    pub fn create_sensor_usage(&self, client_id: ClientId, sensor: SensorType) -> bool {
        match self.clients().get_mut(&client_id) {
            Some(record) => {
                record.usages.entry(sensor).or_default();
                true
            }
            None => false,
        }
    }

    pub fn remove_sensor_usage(&self, client_id: ClientId, sensor: SensorType) -> bool {
        self.clients()
            .get_mut(&client_id)
            .map(|record| record.usages.remove(&sensor).is_some())
            .unwrap_or(false)
    }

    pub fn has_usage(&self, client_id: ClientId) -> bool {
        self.clients()
            .get(&client_id)
            .map(|record| record.has_usage())
            .unwrap_or(false)
    }

    pub fn has_sensor_usage(&self, client_id: ClientId, sensor: SensorType) -> bool {
        self.with_usage(client_id, sensor, |_| ()).is_some()
    }

    // ---- event subscriptions ----

    /// Record a subscription; fails without a usage for the event's sensor
    /// or when the type is already registered
    pub fn register_event(&self, client_id: ClientId, event_type: EventType) -> bool {
        let mut clients = self.clients();
        let Some(usage) = clients
            .get_mut(&client_id)
            .and_then(|record| record.usage_for_event(event_type))
        else {
            return false;
        };
        if usage.is_registered(event_type) {
            return false;
        }
        usage.reg_events.push(event_type);
        true
    }

    /// Drop a subscription; fails unless it is currently registered
    pub fn unregister_event(&self, client_id: ClientId, event_type: EventType) -> bool {
        let mut clients = self.clients();
        let Some(usage) = clients
            .get_mut(&client_id)
            .and_then(|record| record.usage_for_event(event_type))
        else {
            return false;
        };
        match usage.reg_events.iter().position(|e| *e == event_type) {
            Some(index) => {
                usage.reg_events.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn registered_events(&self, client_id: ClientId, sensor: SensorType) -> Vec<EventType> {
        self.with_usage(client_id, sensor, |usage| usage.reg_events.clone())
            .unwrap_or_default()
    }

    /// Clients that receive `event_type` in `situation`, sorted by id
    pub fn get_listener_ids(&self, event_type: EventType, situation: Situation) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .clients()
            .values()
            .filter(|record| record.is_listening(event_type, situation))
            .map(|record| record.client_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    // ---- interval and option ----

    pub fn set_interval(&self, client_id: ClientId, sensor: SensorType, interval_ms: u32) -> bool {
        self.with_usage(client_id, sensor, |usage| usage.interval_ms = interval_ms)
            .is_some()
    }

    pub fn get_interval(&self, client_id: ClientId, sensor: SensorType) -> Option<u32> {
        self.with_usage(client_id, sensor, |usage| usage.interval_ms)
    }

    pub fn set_option(&self, client_id: ClientId, sensor: SensorType, option: SensorOption) -> bool {
        self.with_usage(client_id, sensor, |usage| usage.option = option)
            .is_some()
    }

    pub fn get_option(&self, client_id: ClientId, sensor: SensorType) -> Option<SensorOption> {
        self.with_usage(client_id, sensor, |usage| usage.option)
    }

    // ---- event channel ----

    pub fn set_event_socket(&self, client_id: ClientId, socket: EventSocket) -> bool {
        match self.clients().get_mut(&client_id) {
            Some(record) => {
                record.event_socket = Some(socket);
                true
            }
            None => false,
        }
    }

    pub fn get_event_socket(&self, client_id: ClientId) -> Option<EventSocket> {
        self.clients()
            .get(&client_id)
            .and_then(|record| record.event_socket.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::events;
    use std::os::unix::net::UnixStream;

    fn registry_with_accel_client() -> (SessionRegistry, ClientId) {
        let registry = SessionRegistry::new();
        let id = registry.create_client();
        assert!(registry.create_sensor_usage(id, SensorType::Accelerometer));
        (registry, id)
    }

    #[test]
    fn test_ids_are_unique_and_reused_after_removal() {
        let registry = SessionRegistry::new();
        let a = registry.create_client();
        let b = registry.create_client();
        assert_ne!(a, b);
        assert!(registry.remove_client(a));
        assert_eq!(registry.create_client(), a);
    }

    #[test]
    fn test_register_requires_usage() {
        let registry = SessionRegistry::new();
        let id = registry.create_client();
        assert!(!registry.register_event(id, events::ACCEL_RAW_DATA));
        registry.create_sensor_usage(id, SensorType::Accelerometer);
        assert!(registry.register_event(id, events::ACCEL_RAW_DATA));
        assert!(!registry.register_event(id, events::ACCEL_RAW_DATA));
    }

    #[test]
    fn test_unregister_requires_exact_match() {
        let (registry, id) = registry_with_accel_client();
        assert!(!registry.unregister_event(id, events::ACCEL_RAW_DATA));
        registry.register_event(id, events::ACCEL_RAW_DATA);
        assert!(!registry.unregister_event(id, events::ACCEL_GRAVITY_DATA));
        assert_eq!(registry.registered_events(id, SensorType::Accelerometer).len(), 1);
        assert!(registry.unregister_event(id, events::ACCEL_RAW_DATA));
    }

    #[test]
    fn test_listener_ids_filter_by_situation() {
        let (registry, a) = registry_with_accel_client();
        let b = registry.create_client();
        registry.create_sensor_usage(b, SensorType::Accelerometer);
        registry.register_event(a, events::ACCEL_RAW_DATA);
        registry.register_event(b, events::ACCEL_RAW_DATA);
        registry.set_option(b, SensorType::Accelerometer, SensorOption::ALWAYS_ON);

        assert_eq!(
            registry.get_listener_ids(events::ACCEL_RAW_DATA, Situation::LcdOn),
            vec![a, b]
        );
        assert_eq!(
            registry.get_listener_ids(events::ACCEL_RAW_DATA, Situation::LcdOff),
            vec![b]
        );
        assert!(registry
            .get_listener_ids(events::LIGHT_LUX_DATA, Situation::LcdOn)
            .is_empty());
    }

    #[test]
    fn test_unknown_client_operations_fail() {
        let registry = SessionRegistry::new();
        assert!(!registry.bind_pid(42, 1));
        assert!(!registry.create_sensor_usage(42, SensorType::Light));
        assert!(!registry.set_interval(42, SensorType::Light, 100));
        assert!(!registry.register_event(42, events::LIGHT_LUX_DATA));
        assert!(registry.get_event_socket(42).is_none());
    }

    #[test]
    fn test_remove_client_if_unused() {
        let (registry, id) = registry_with_accel_client();
        assert!(!registry.remove_client_if_unused(id));
        registry.remove_sensor_usage(id, SensorType::Accelerometer);
        assert!(registry.remove_client_if_unused(id));
        assert!(!registry.has_client(id));
    }

    #[test]
    fn test_event_socket_storage() {
        let registry = SessionRegistry::new();
        let id = registry.create_client();
        let (server, _client) = UnixStream::pair().unwrap();
        let socket = EventSocket::new(server).unwrap();
        assert!(registry.set_event_socket(id, socket.clone()));
        assert!(registry.get_event_socket(id).unwrap().same_as(&socket));
    }

    #[test]
    fn test_interval_and_option() {
        let (registry, id) = registry_with_accel_client();
        assert!(registry.set_interval(id, SensorType::Accelerometer, 100));
        assert_eq!(registry.get_interval(id, SensorType::Accelerometer), Some(100));
        assert!(registry.set_option(id, SensorType::Accelerometer, SensorOption::ON_IN_SCREEN_OFF));
        assert_eq!(
            registry.get_option(id, SensorType::Accelerometer),
            Some(SensorOption::ON_IN_SCREEN_OFF)
        );
    }
}
