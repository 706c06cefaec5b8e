//! Simulated modules for running without hardware
//!
//! Compiled with the `mock-sensor` feature. [`register_mock_modules`] puts an
//! accelerometer, a magnetometer, a light sensor, a context hub and their
//! processors into a registry as built-ins, and [`MOCK_STREAM_CATALOG`] wires
//! them into four streams. The geomagnetic stream chains onto the
//! accelerometer processor; the context stream carries sensor-hub traffic. The binary uses both for `--mock`; the test suite
//! drives the whole server through them.
//!
//! ```ignore
//! let registry = ModuleRegistry::new();
//! register_mock_modules(&registry)?;
//! let queue = EventQueue::new(config.events.queue_capacity);
//! let streams = mock_stream_graph(&registry, &queue)?;
//! ```

pub mod geo;
pub mod hub;
pub mod pattern;
pub mod processor;
pub mod sensor;

pub use geo::{attitude, MockGeoProcessor, GEO_POLLING_INTERVAL_MS};
pub use hub::{CommandHistory, MockHubProcessor, RESET_NOTIFICATION};
pub use pattern::{SignalAxis, SignalPattern};
pub use processor::{rotation, rotation_of, MockAccelProcessor, MockDataProcessor};
pub use sensor::{MockSensor, PROPERTY_GET_WAKEUP, PROPERTY_SET_WAKEUP, PROPERTY_TRIGGER_WAKEUP};

use crate::config::Catalog;
use crate::error::Result;
use crate::event::EventQueue;
use crate::module::{Module, ModuleRegistry};
use crate::stream::StreamGraph;
use crate::types::{events, SensorType};

/// Stream catalog wiring the simulated modules
pub const MOCK_STREAM_CATALOG: &str = r#"
[accel_datastream]
ID = 1
MULTI_STREAM = "disable"
PROCESSOR_INPUT = ["accel_processor accel_proc0 accel_sensor"]

[geomag_datastream]
ID = 2
PROCESSOR_INPUT = ["geo_processor geo_proc0 geomag_sensor accel_proc0"]

[lumin_datastream]
ID = 3
PROCESSOR_INPUT = ["lumin_processor lumin_proc0 light_sensor"]

[context_datastream]
ID = 11
PROCESSOR_INPUT = ["context_processor ctx_proc0 context_sensor"]
"#;

/// Register the simulated sensors and processor prototypes
pub fn register_mock_modules(registry: &ModuleRegistry) -> Result<()> {
    registry.register_builtin(Module::sensor(MockSensor::new(
        "accel_sensor",
        SensorType::Accelerometer,
    )))?;
    registry.register_builtin(Module::sensor(MockSensor::new(
        "geomag_sensor",
        SensorType::Geomagnetic,
    )))?;
    registry.register_builtin(Module::sensor(MockSensor::new("light_sensor", SensorType::Light)))?;
    registry.register_builtin(Module::sensor(MockSensor::new(
        "context_sensor",
        SensorType::Context,
    )))?;
    registry.register_builtin(Module::processor(MockAccelProcessor::new("accel_processor")))?;
    registry.register_builtin(Module::processor(MockGeoProcessor::new("geo_processor")))?;
    registry.register_builtin(Module::processor(MockDataProcessor::new(
        "lumin_processor",
        SensorType::Light,
        events::LIGHT_LUX_DATA,
    )))?;
    registry.register_builtin(Module::processor(MockHubProcessor::new("context_processor")))?;
    tracing::info!("Registered simulated sensor modules");
    Ok(())
}

/// Compose [`MOCK_STREAM_CATALOG`] over modules registered by
/// [`register_mock_modules`]
pub fn mock_stream_graph(registry: &ModuleRegistry, queue: &EventQueue) -> Result<StreamGraph> {
    let catalog = Catalog::from_toml_str(MOCK_STREAM_CATALOG)?;
    Ok(StreamGraph::build(&catalog, registry, queue))
}
