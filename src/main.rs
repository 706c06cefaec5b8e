//! Sensor daemon - Main Entry Point
//!
//! Loads the server configuration, registers the sensor modules (plugins
//! from the catalogs, or the simulated set with `--mock`), composes the
//! streams and serves both sockets until the process is terminated.

use anyhow::Context;
use clap::Parser;
use sensord_rs::{
    config::ServerConfig,
    event::EventQueue,
    module::ModuleRegistry,
    server::{self, SensorServer},
    situation::SituationMonitor,
    stream::StreamGraph,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "sensord", version, about = "Out-of-process sensor broker")]
struct Args {
    /// Server configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve simulated sensors instead of loading plugins
    #[arg(long)]
    mock: bool,

    /// Override the command channel socket path
    #[arg(long)]
    command_socket: Option<PathBuf>,

    /// Override the event channel socket path
    #[arg(long)]
    event_socket: Option<PathBuf>,
}

fn init_logging(config: &ServerConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sensord_rs=debug"));

    match &config.logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}

fn build_streams(
    args: &Args,
    config: &ServerConfig,
    registry: &ModuleRegistry,
    queue: &EventQueue,
) -> anyhow::Result<StreamGraph> {
    if args.mock {
        #[cfg(feature = "mock-sensor")]
        {
            sensord_rs::mock::register_mock_modules(registry)?;
            return Ok(sensord_rs::mock::mock_stream_graph(registry, queue)?);
        }
        #[cfg(not(feature = "mock-sensor"))]
        anyhow::bail!("--mock requires the mock-sensor feature");
    }

    let loaded = server::load_module_catalogs(config, registry)?;
    tracing::info!("{} modules registered", loaded);
    let catalog = server::load_stream_catalog(config)?;
    Ok(StreamGraph::build(&catalog, registry, queue))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load_or_default(args.config.as_deref())
        .context("Failed to load server configuration")?;
    if let Some(path) = &args.command_socket {
        config.server.command_socket = path.clone();
    }
    if let Some(path) = &args.event_socket {
        config.server.event_socket = path.clone();
    }

    let _log_guard = init_logging(&config);
    tracing::info!("Starting sensor daemon");

    let registry = ModuleRegistry::new();
    let queue = EventQueue::new(config.events.queue_capacity);
    let streams =
        build_streams(&args, &config, &registry, &queue).context("Failed to compose streams")?;
    if streams.is_empty() {
        tracing::warn!("No stream could be composed; every HELLO will fail");
    }

    let _server = SensorServer::start(&config, registry, streams, queue, SituationMonitor::new())
        .context("Failed to start sensor server")?;

    loop {
        std::thread::park();
    }
}
