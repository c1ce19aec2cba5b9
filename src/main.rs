use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_scheduler::{
    config::Config,
    models::{ScheduleDefinition, Stream},
    repositories::{
        InMemoryScheduleRepository, InMemoryStreamRepository, ScheduleRepository,
        StreamRepository,
    },
    scheduling::{EngineSettings, RecurringScheduleEngine},
    services::{
        FfmpegLauncher, HttpBroadcastCreator, ProcessSupervisor, SupervisorSettings,
        TerminationSweeper,
    },
    utils::SystemClock,
};

#[derive(Parser)]
#[command(name = "stream-scheduler")]
#[command(version)]
#[command(about = "Runs time-bounded encoder processes and recurring broadcast schedules")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// JSON file with streams and schedule definitions to load at startup
    #[arg(short, long, value_name = "FILE")]
    definitions: Option<String>,

    /// IANA timezone for daily/weekly schedules (overrides config file)
    #[arg(short, long, value_name = "TZ")]
    timezone: Option<String>,
}

/// Startup contents of the in-memory repositories
#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    streams: Vec<Stream>,
    #[serde(default)]
    schedules: Vec<ScheduleDefinition>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("stream_scheduler={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting stream scheduler v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(timezone) = cli.timezone {
        config.timezone = timezone;
        config.validate()?;
    }
    let timezone = config.timezone()?;
    info!("Schedules evaluated in timezone {}", timezone.name());

    let streams: Arc<dyn StreamRepository> = Arc::new(InMemoryStreamRepository::new());
    let schedules: Arc<dyn ScheduleRepository> = Arc::new(InMemoryScheduleRepository::new());

    if let Some(path) = &cli.definitions {
        seed_repositories(path, &streams, &schedules).await?;
    }

    let clock = SystemClock::shared();
    let launcher = Arc::new(FfmpegLauncher::new(&config.encoder));
    let supervisor = ProcessSupervisor::new(
        streams.clone(),
        launcher,
        clock.clone(),
        SupervisorSettings::from_config(&config),
    );
    info!(
        "Process supervisor initialized (encoder '{}', max {} restarts)",
        config.encoder.command, config.supervisor.max_retries
    );

    let recovery = supervisor.recover_orphans().await?;
    if !recovery.resumed.is_empty() || !recovery.completed.is_empty() {
        info!(
            "Recovered live streams from previous run: {} resumed, {} completed",
            recovery.resumed.len(),
            recovery.completed.len()
        );
    }

    let creator = Arc::new(HttpBroadcastCreator::new(&config.broadcast)?);
    let engine = RecurringScheduleEngine::new(
        schedules,
        streams.clone(),
        creator,
        supervisor.clone(),
        clock.clone(),
        timezone,
        EngineSettings::from_config(&config),
    );
    let sweeper = TerminationSweeper::new(
        streams,
        supervisor.clone(),
        clock,
        &config.termination,
    );

    let cancellation_token = CancellationToken::new();

    let engine_token = cancellation_token.clone();
    let engine_handle = tokio::spawn(async move { engine.run(engine_token).await });

    let sweeper_token = cancellation_token.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_token).await });

    info!("All services started successfully");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    cancellation_token.cancel();
    let tasks = [
        ("schedule engine", engine_handle),
        ("termination sweep", sweeper_handle),
    ];
    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    let stopped = supervisor.shutdown().await;
    info!("Stopped {} encoder(s), exiting", stopped);

    Ok(())
}

async fn seed_repositories(
    path: &str,
    streams: &Arc<dyn StreamRepository>,
    schedules: &Arc<dyn ScheduleRepository>,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read definitions file {path}"))?;
    let seed: SeedFile = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse definitions file {path}"))?;

    let (stream_count, schedule_count) = (seed.streams.len(), seed.schedules.len());
    for stream in seed.streams {
        let title = stream.title.clone();
        if let Err(e) = streams.save(stream).await {
            warn!("Skipping stream '{}': {}", title, e);
        }
    }
    for definition in seed.schedules {
        let name = definition.name.clone();
        if let Err(e) = schedules.save(definition).await {
            warn!("Skipping schedule definition '{}': {}", name, e);
        }
    }

    info!(
        "Loaded {} stream(s) and {} schedule definition(s) from {}",
        stream_count, schedule_count, path
    );
    Ok(())
}
