//! Per-client session records

use crate::event::EventSocket;
use crate::types::{ClientId, EventType, SensorOption, SensorType, Situation};
use std::collections::HashMap;

/// What one client does with one sensor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorUsage {
    /// Registered event types, in registration order
    pub reg_events: Vec<EventType>,
    /// Requested polling interval, 0 when none
    pub interval_ms: u32,
    /// Delivery option flags
    pub option: SensorOption,
}

impl SensorUsage {
    pub fn is_registered(&self, event_type: EventType) -> bool {
        self.reg_events.contains(&event_type)
    }
}

/// Everything the server knows about one client
#[derive(Debug, Default)]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub pid: Option<i32>,
    pub usages: HashMap<SensorType, SensorUsage>,
    pub event_socket: Option<EventSocket>,
}

impl ClientRecord {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            ..Default::default()
        }
    }

    /// Short description for logs
    pub fn info(&self) -> String {
        match self.pid {
            Some(pid) => format!("client[{}] (pid {})", self.client_id, pid),
            None => format!("client[{}]", self.client_id),
        }
    }

    pub fn has_usage(&self) -> bool {
        !self.usages.is_empty()
    }

    /// Whether this client should receive `event_type` in `situation`
    pub fn is_listening(&self, event_type: EventType, situation: Situation) -> bool {
        event_type
            .sensor()
            .and_then(|sensor| self.usages.get(&sensor))
            .map(|usage| usage.is_registered(event_type) && usage.option.permits(situation))
            .unwrap_or(false)
    }

    pub fn usage_for_event(&mut self, event_type: EventType) -> Option<&mut SensorUsage> {
        let sensor = event_type.sensor()?;
        self.usages.get_mut(&sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::events;

    #[test]
    fn test_is_listening_respects_option() {
        let mut record = ClientRecord::new(1);
        record.usages.insert(
            SensorType::Accelerometer,
            SensorUsage {
                reg_events: vec![events::ACCEL_RAW_DATA],
                ..Default::default()
            },
        );
        assert!(record.is_listening(events::ACCEL_RAW_DATA, Situation::LcdOn));
        assert!(!record.is_listening(events::ACCEL_RAW_DATA, Situation::LcdOff));
        assert!(!record.is_listening(events::ACCEL_GRAVITY_DATA, Situation::LcdOn));

        if let Some(usage) = record.usages.get_mut(&SensorType::Accelerometer) {
            usage.option = SensorOption::ON_IN_SCREEN_OFF;
        }
        assert!(record.is_listening(events::ACCEL_RAW_DATA, Situation::LcdOff));
    }

    #[test]
    fn test_info() {
        let mut record = ClientRecord::new(3);
        assert_eq!(record.info(), "client[3]");
        record.pid = Some(77);
        assert_eq!(record.info(), "client[3] (pid 77)");
    }
}
