//! Plugin capability interfaces
//!
//! Every plugin is one of three capability variants:
//!
//! - **Sensor** ([`SensorModule`]) - a hardware or virtual data source that
//!   can be started, polled for readiness and read
//! - **Filter** ([`FilterModule`]) - an optional pre-processing stage fed by
//!   sensors
//! - **Processor** ([`ProcessorModule`]) - turns readings from its inputs into
//!   typed client-facing events
//!
//! Sensors and filter/processor prototypes are shared (`Arc`) between the
//! streams that use them. Filters and processors are never used as shared
//! prototypes directly: stream composition asks the prototype for a fresh,
//! independently owned instance through `create_new`.
//!
//! # Plugin ABI
//!
//! A plugin shared object exports two entry points, generated by
//! [`declare_module!`]:
//!
//! - `module_init() -> *mut c_void` - constructs the module and returns a
//!   boxed [`Module`], or null on failure
//! - `module_exit(*mut c_void)` - destroys what `module_init` returned
//!
//! Both sides exchange Rust trait objects, so plugins must be built against
//! the same version of this crate with the same toolchain as the server.

pub mod registry;

pub use registry::{ModuleRegistry, PluginLibrary};

use crate::error::Result;
use crate::processor::{ProcessContext, Processor};
use crate::types::{BaseData, BaseProperty, EventType, SensorType};
use std::fmt;
use std::sync::Arc;

/// Symbol constructing a module
pub const MODULE_INIT_SYMBOL: &[u8] = b"module_init";

/// Symbol destroying a module
pub const MODULE_EXIT_SYMBOL: &[u8] = b"module_exit";

/// Signature of [`MODULE_INIT_SYMBOL`]
pub type ModuleInitFn = unsafe extern "C" fn() -> *mut std::ffi::c_void;

/// Signature of [`MODULE_EXIT_SYMBOL`]
pub type ModuleExitFn = unsafe extern "C" fn(*mut std::ffi::c_void);

/// A hardware or virtual data source
#[cfg_attr(test, mockall::automock)]
pub trait SensorModule: Send + Sync {
    /// Unique module name
    fn name(&self) -> &str;

    /// Sensor kind this module provides
    fn sensor_type(&self) -> SensorType;

    /// Power up the device
    fn start(&self) -> bool;

    /// Power down the device
    fn stop(&self) -> bool;

    /// Whether a new sample is available; blocks until one is when `wait` is set
    fn is_data_ready(&self, wait: bool) -> bool;

    /// Reprogram the device sampling period
    fn update_polling_interval(&self, interval_ms: u32) -> bool;

    /// Read the static property struct for `level`
    fn get_property(&self, level: u32) -> Result<BaseProperty>;

    /// Read the latest data struct of `struct_type`
    fn get_struct_value(&self, struct_type: u32) -> Result<BaseData>;

    /// Vendor command; returns a status or a read value
    fn set_cmd(&self, cmd: i32, property: i32, value: i64) -> i64;

    /// Forward an opaque buffer to a co-processor
    fn send_sensorhub_data(&self, _data: &[u8]) -> i32 {
        -1
    }
}

/// A pre-processing stage between sensors and processors
pub trait FilterModule: Send + Sync {
    fn name(&self) -> &str;

    fn sensor_type(&self) -> SensorType;

    /// Fresh instance named `name`, with no inputs
    fn create_new(&self, name: &str) -> Option<Box<dyn FilterModule>>;

    /// Attach a sensor input
    fn add_input(&mut self, sensor: Arc<dyn SensorModule>) -> bool;

    fn start(&self) -> bool;

    fn stop(&self) -> bool;

    fn is_data_ready(&self, wait: bool) -> bool;

    fn update_polling_interval(&self, interval_ms: u32) -> bool;

    fn get_property(&self, level: u32) -> Result<BaseProperty>;

    fn get_struct_value(&self, struct_type: u32) -> Result<BaseData>;
}

/// Input wired into a processor at composition time
#[derive(Clone)]
pub enum ProcessorInput {
    Sensor(Arc<dyn SensorModule>),
    Processor(Arc<Processor>),
}

impl ProcessorInput {
    pub fn name(&self) -> &str {
        match self {
            ProcessorInput::Sensor(sensor) => sensor.name(),
            ProcessorInput::Processor(processor) => processor.name(),
        }
    }
}

/// Event-producing logic of a processor plugin.
///
/// The server wraps each instance in a [`Processor`], which owns the start
/// refcount, per-event client counts, interval arbitration and the polling
/// worker. The plugin only supplies hardware activation and one polling step.
pub trait ProcessorModule: Send + Sync {
    fn name(&self) -> &str;

    /// Sensor kind this processor serves
    fn sensor_type(&self) -> SensorType;

    /// Event types clients may register for
    fn supported_events(&self) -> Vec<EventType>;

    /// Fresh instance named `name`, with no inputs
    fn create_new(&self, name: &str) -> Option<Box<dyn ProcessorModule>>;

    /// Attach an input sensor or upstream processor
    fn add_input(&mut self, input: ProcessorInput) -> bool;

    /// Activate the hardware behind this processor (first START)
    fn activate(&self) -> bool;

    /// Deactivate the hardware behind this processor (last STOP)
    fn deactivate(&self) -> bool;

    /// One polling step. Blocks on the input's readiness wait and pushes
    /// events through `ctx`; returns false when no sample was available.
    fn process(&self, ctx: &ProcessContext<'_>) -> bool;

    /// Reprogram the sampling period of the inputs
    fn update_polling_interval(&self, interval_ms: u32) -> bool;

    fn set_cmd(&self, cmd: i32, property: i32, value: i64) -> i64;

    fn get_property(&self, level: u32) -> Result<BaseProperty>;

    fn get_struct_value(&self, struct_type: u32) -> Result<BaseData>;

    fn send_sensorhub_data(&self, _data: &[u8]) -> i32 {
        -1
    }

    /// Called when the client count of `event_type` goes from 0 to 1
    fn on_first_client(&self, _event_type: EventType) {}

    /// Called when the client count of `event_type` drops back to 0
    fn on_last_client(&self, _event_type: EventType) {}
}

/// Capability variant of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Sensor,
    Filter,
    Processor,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Sensor => write!(f, "sensor"),
            ModuleKind::Filter => write!(f, "filter"),
            ModuleKind::Processor => write!(f, "processor"),
        }
    }
}

/// A processor as found in the registry
#[derive(Clone)]
pub enum ProcessorRef {
    /// Prototype loaded from a plugin; only used to create instances
    Prototype(Arc<dyn ProcessorModule>),
    /// Instance composed into a stream
    Instance(Arc<Processor>),
}

impl ProcessorRef {
    pub fn name(&self) -> &str {
        match self {
            ProcessorRef::Prototype(module) => module.name(),
            ProcessorRef::Instance(processor) => processor.name(),
        }
    }

    /// Fresh, independently owned processor logic named `name`
    pub fn create_new(&self, name: &str) -> Option<Box<dyn ProcessorModule>> {
        match self {
            ProcessorRef::Prototype(module) => module.create_new(name),
            ProcessorRef::Instance(processor) => processor.module().create_new(name),
        }
    }
}

/// A loaded plugin instance
#[derive(Clone)]
pub enum Module {
    Sensor(Arc<dyn SensorModule>),
    Filter(Arc<dyn FilterModule>),
    Processor(ProcessorRef),
}

impl Module {
    /// Wrap a sensor implementation
    pub fn sensor(sensor: impl SensorModule + 'static) -> Self {
        Module::Sensor(Arc::new(sensor))
    }

    /// Wrap a filter prototype
    pub fn filter(filter: impl FilterModule + 'static) -> Self {
        Module::Filter(Arc::new(filter))
    }

    /// Wrap a processor prototype
    pub fn processor(processor: impl ProcessorModule + 'static) -> Self {
        Module::Processor(ProcessorRef::Prototype(Arc::new(processor)))
    }

    pub fn name(&self) -> &str {
        match self {
            Module::Sensor(sensor) => sensor.name(),
            Module::Filter(filter) => filter.name(),
            Module::Processor(processor) => processor.name(),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::Sensor(_) => ModuleKind::Sensor,
            Module::Filter(_) => ModuleKind::Filter,
            Module::Processor(_) => ModuleKind::Processor,
        }
    }

    /// Release runtime resources held by the module
    pub(crate) fn destroy(&self) {
        if let Module::Processor(ProcessorRef::Instance(processor)) = self {
            processor.shutdown();
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Export a module constructor as the plugin entry points.
///
/// ```ignore
/// sensord_rs::declare_module!(|| {
///     sensord_rs::module::Module::sensor(MyAccelSensor::open("/dev/input/event3"))
/// });
/// ```
#[macro_export]
macro_rules! declare_module {
    ($constructor:expr) => {
        #[no_mangle]
        pub extern "C" fn module_init() -> *mut ::std::ffi::c_void {
            let constructor = $constructor;
            let module: $crate::module::Module = constructor();
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(module)) as *mut ::std::ffi::c_void
        }

        /// # Safety
        ///
        /// `module` must be null or a pointer returned by `module_init`.
        #[no_mangle]
        pub unsafe extern "C" fn module_exit(module: *mut ::std::ffi::c_void) {
            if !module.is_null() {
                drop(::std::boxed::Box::from_raw(
                    module as *mut $crate::module::Module,
                ));
            }
        }
    };
}
