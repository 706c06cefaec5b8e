//! Stream Graph
//!
//! A stream is a named pipeline: an ordered list of filter instances and an
//! ordered list of processor instances, each created fresh from a registered
//! prototype and wired to its inputs. Streams are composed once at startup
//! from the stream catalog and never change afterwards.
//!
//! # Composite lines
//!
//! Each `FILTER_INPUT` / `PROCESSOR_INPUT` entry is a whitespace separated
//! line:
//!
//! ```text
//! module_name new_instance_name [input_name]*
//! ```
//!
//! Composition is best effort. An input that cannot be resolved or that the
//! instance rejects is skipped with a log; a line whose module or instance
//! name is missing is skipped; a stream left without a processor is dropped.

use crate::config::catalog::{
    Catalog, KEY_FILTER_INPUT, KEY_ID, KEY_MULTI_STREAM, KEY_PROCESSOR_INPUT,
};
use crate::error::{Result, SensordError};
use crate::event::EventQueue;
use crate::module::{
    FilterModule, Module, ModuleRegistry, PluginLibrary, ProcessorInput, ProcessorRef,
};
use crate::processor::Processor;
use crate::types::SensorType;
use std::sync::Arc;

/// Name of the stream serving `sensor`
pub fn stream_name_for(sensor: SensorType) -> Option<&'static str> {
    match sensor {
        SensorType::Accelerometer => Some("accel_datastream"),
        SensorType::Geomagnetic => Some("geomag_datastream"),
        SensorType::Light => Some("lumin_datastream"),
        SensorType::Proximity => Some("proxi_datastream"),
        SensorType::Gyroscope => Some("gyro_datastream"),
        SensorType::Pressure => Some("barometer_datastream"),
        SensorType::Motion => Some("motion_datastream"),
        SensorType::Fusion => Some("fusion_datastream"),
        SensorType::Pedometer => Some("pedo_datastream"),
        SensorType::Context => Some("context_datastream"),
        SensorType::Flat => Some("flat_datastream"),
        SensorType::Bio => Some("bio_datastream"),
        SensorType::BioHrm => Some("bio_hrm_datastream"),
        SensorType::Unknown | SensorType::Thermometer => None,
    }
}

/// A composed pipeline
pub struct DataStream {
    name: String,
    id: i64,
    filters: Vec<Arc<dyn FilterModule>>,
    processors: Vec<Arc<Processor>>,
    // Declared last so filter code outlives the filters.
    libraries: Vec<Arc<PluginLibrary>>,
}

impl DataStream {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Head processor, the one clients talk to
    pub fn processor(&self) -> Option<&Arc<Processor>> {
        self.processors.first()
    }

    pub fn processors(&self) -> &[Arc<Processor>] {
        &self.processors
    }

    /// First filter of the pipeline, if any
    pub fn select_filter(&self) -> Option<&Arc<dyn FilterModule>> {
        self.filters.first()
    }

    pub fn filters(&self) -> &[Arc<dyn FilterModule>] {
        &self.filters
    }

    /// Stop every processor of this stream regardless of its refcount
    pub fn shutdown(&self) {
        for processor in &self.processors {
            processor.shutdown();
        }
    }
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("name", &self.name)
            .field("id", &self.id)
            .field(
                "filters",
                &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Split a composite line into module name, instance name and inputs
fn parse_composite(line: &str) -> Result<(&str, &str, Vec<&str>)> {
    let mut tokens = line.split_whitespace();
    let module = tokens
        .next()
        .ok_or_else(|| SensordError::Composition("Empty composite line".to_string()))?;
    let instance = tokens.next().ok_or_else(|| {
        SensordError::Composition(format!("No instance name after {}", module))
    })?;
    Ok((module, instance, tokens.collect()))
}

/// The set of composed streams
#[derive(Debug, Default)]
pub struct StreamGraph {
    streams: Vec<Arc<DataStream>>,
}

impl StreamGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose every enabled stream of `catalog`
    pub fn build(catalog: &Catalog, registry: &ModuleRegistry, queue: &EventQueue) -> Self {
        let mut graph = Self::new();
        for name in catalog.sections() {
            if catalog.is_disabled(name) {
                tracing::info!("Stream {} is disabled", name);
                continue;
            }
            match compose_stream(catalog, name, registry, queue) {
                Ok(stream) => {
                    tracing::info!("Composed {:?}", stream);
                    graph.streams.push(Arc::new(stream));
                }
                Err(e) => tracing::warn!("Stream {} dropped: {}", name, e),
            }
        }
        tracing::info!("{} streams composed", graph.streams.len());
        graph
    }

    /// Find a stream by exact name
    pub fn lookup(&self, name: &str) -> Option<Arc<DataStream>> {
        self.streams.iter().find(|s| s.name == name).cloned()
    }

    /// Find the stream serving `sensor`
    pub fn lookup_sensor(&self, sensor: SensorType) -> Option<Arc<DataStream>> {
        stream_name_for(sensor).and_then(|name| self.lookup(name))
    }

    pub fn streams(&self) -> &[Arc<DataStream>] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Stop every started processor, latest composed stream first so a
    /// chained processor releases its input before that input stops
    pub fn shutdown_all(&self) {
        for stream in self.streams.iter().rev() {
            stream.shutdown();
        }
    }
}

fn compose_stream(
    catalog: &Catalog,
    name: &str,
    registry: &ModuleRegistry,
    queue: &EventQueue,
) -> Result<DataStream> {
    let multi_stream = !catalog
        .value(name, KEY_MULTI_STREAM, 0)
        .map(|v| v.is("disable"))
        .unwrap_or(false);
    let id = catalog
        .value(name, KEY_ID, 0)
        .and_then(|v| v.as_number())
        .unwrap_or(0);

    let mut stream = DataStream {
        name: name.to_string(),
        id,
        filters: Vec::new(),
        processors: Vec::new(),
        libraries: Vec::new(),
    };

    for line in catalog.values(name, KEY_FILTER_INPUT) {
        let line = line.to_string();
        match compose_filter(&line, registry, multi_stream) {
            Ok((filter, libraries)) => {
                stream.filters.push(filter);
                stream.libraries.extend(libraries);
                if !multi_stream {
                    break;
                }
            }
            Err(e) => tracing::warn!("Stream {}: filter line {:?} skipped: {}", name, line, e),
        }
    }

    for line in catalog.values(name, KEY_PROCESSOR_INPUT) {
        let line = line.to_string();
        match compose_processor(&line, registry, queue) {
            Ok(processor) => {
                stream.processors.push(processor);
                if !multi_stream {
                    break;
                }
            }
            Err(e) => tracing::warn!("Stream {}: processor line {:?} skipped: {}", name, line, e),
        }
    }

    if stream.processors.is_empty() {
        return Err(SensordError::Composition(
            "no processor could be built".to_string(),
        ));
    }
    Ok(stream)
}

fn compose_filter(
    line: &str,
    registry: &ModuleRegistry,
    multi_stream: bool,
) -> Result<(Arc<dyn FilterModule>, Vec<Arc<PluginLibrary>>)> {
    let (module_name, instance_name, inputs) = parse_composite(line)?;
    let entry = registry
        .lookup_entry(module_name)
        .ok_or_else(|| SensordError::Composition(format!("No module named {}", module_name)))?;
    let Module::Filter(prototype) = &entry.module else {
        return Err(SensordError::Composition(format!(
            "{} is a {}, not a filter",
            module_name,
            entry.module.kind()
        )));
    };
    let mut filter = prototype.create_new(instance_name).ok_or_else(|| {
        SensordError::Composition(format!("{} could not create {}", module_name, instance_name))
    })?;

    let mut libraries: Vec<Arc<PluginLibrary>> = entry.library.into_iter().collect();
    for input in inputs {
        let Some(input_entry) = registry.lookup_entry(input) else {
            tracing::warn!("Filter {}: no sensor named {}", instance_name, input);
            continue;
        };
        let Module::Sensor(sensor) = input_entry.module else {
            tracing::warn!("Filter {}: input {} is not a sensor", instance_name, input);
            continue;
        };
        if !filter.add_input(sensor) {
            tracing::warn!("Filter {}: input {} rejected", instance_name, input);
            continue;
        }
        libraries.extend(input_entry.library);
        tracing::debug!("Filter {} added input {}", instance_name, input);
        if !multi_stream {
            break;
        }
    }
    Ok((Arc::from(filter), libraries))
}

fn compose_processor(
    line: &str,
    registry: &ModuleRegistry,
    queue: &EventQueue,
) -> Result<Arc<Processor>> {
    let (module_name, instance_name, inputs) = parse_composite(line)?;
    let entry = registry
        .lookup_entry(module_name)
        .ok_or_else(|| SensordError::Composition(format!("No module named {}", module_name)))?;
    let Module::Processor(prototype) = &entry.module else {
        return Err(SensordError::Composition(format!(
            "{} is a {}, not a processor",
            module_name,
            entry.module.kind()
        )));
    };
    let logic = prototype.create_new(instance_name).ok_or_else(|| {
        SensordError::Composition(format!("{} could not create {}", module_name, instance_name))
    })?;

    let mut processor = Processor::new(logic, queue.clone());
    if let Some(library) = entry.library.clone() {
        processor.attach_library(library);
    }

    for input in inputs {
        let Some(input_entry) = registry.lookup_entry(input) else {
            tracing::error!("Processor {}: failed to resolve input {}", instance_name, input);
            continue;
        };
        let resolved = match input_entry.module {
            Module::Sensor(sensor) => ProcessorInput::Sensor(sensor),
            Module::Processor(ProcessorRef::Instance(upstream)) => {
                ProcessorInput::Processor(upstream)
            }
            Module::Processor(ProcessorRef::Prototype(_)) => {
                tracing::warn!(
                    "Processor {}: input {} is a prototype, not a composed instance",
                    instance_name,
                    input
                );
                continue;
            }
            Module::Filter(_) => {
                tracing::warn!("Processor {}: input {} is a filter", instance_name, input);
                continue;
            }
        };
        processor.add_input(resolved, input_entry.library);
    }

    let processor = Arc::new(processor);
    registry.register_instance(
        Module::Processor(ProcessorRef::Instance(processor.clone())),
        entry.library,
    )?;
    Ok(processor)
}
