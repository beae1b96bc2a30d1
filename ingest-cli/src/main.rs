use std::sync::Arc;

use clap::Parser;
use cmaf_ingest_engine::{IngestConfig, IngesterRegistry, VodSource};
use error::AppError;
use mimalloc::MiMalloc;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod error;
mod server;
mod utils;

use cli::CliArgs;
use utils::{parse_headers, parse_time};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    // Held until exit so buffered file logs are flushed
    let _log_guard = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (file_writer, guard) = tracing_appender::non_blocking(file);
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(MakeWriterExt::and(std::io::stdout, file_writer))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| AppError::Initialization(e.to_string()))?;
            Some(guard)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| AppError::Initialization(e.to_string()))?;
            None
        }
    };

    info!("CMAF live ingest server - part of the rust-srec project by hua0512");
    info!("==================================================================");

    let config = IngestConfig::builder()
        .with_timeout(parse_time(&args.timeout)?)
        .with_connect_timeout(parse_time(&args.connect_timeout)?)
        .with_bridge_capacity(args.bridge_capacity)
        .with_drain_grace_period(parse_time(&args.drain_grace)?)
        .with_headers(parse_headers(&args.headers)?)
        .build();
    info!(
        timeout = ?config.timeout,
        connect_timeout = ?config.connect_timeout,
        bridge_capacity = config.bridge_capacity,
        drain_grace_period = ?config.drain_grace_period,
        "Ingest configuration"
    );

    let source = VodSource::load(&args.assets)?;
    info!(
        root = %args.assets.display(),
        assets = source.asset_paths().len(),
        "Asset catalogue loaded"
    );

    let registry = Arc::new(IngesterRegistry::new(source, config)?);
    registry.start();

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    server::serve(listener, registry).await
}
