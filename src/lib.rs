pub mod ai;
pub mod api;
pub mod config;
pub mod config_store;
pub mod constants;
pub mod danmaku;
pub mod db;
pub mod entities;
pub mod image;
pub mod matching;
pub mod metadata;
pub mod models;
pub mod rate_limiter;
pub mod recognition;
pub mod scheduler;
pub mod scrapers;
pub mod search;
pub mod state;
pub mod tasks;
pub mod webhook;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use config::Config;
use scheduler::Scheduler;
use state::SharedState;

#[derive(Parser)]
#[command(name = "danmarr", about = "Danmaku aggregation & ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run API server + scheduler (default mode).
    Daemon,
    /// Run the API server only.
    Web,
    /// Run one scheduler pass and exit.
    Check,
    /// Write a default config.toml and exit.
    Init,
}

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    run_with_config(config).await
}

pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let prometheus_handle = init_prometheus(&config)?;
    init_logging(&config);

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Daemon) => run_daemon(config, prometheus_handle).await,
        Some(Commands::Web) => run_web(config, prometheus_handle).await,
        Some(Commands::Check) => run_single_check(config).await,
        Some(Commands::Init) => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created. Edit config.toml and run again.");
            } else {
                println!("config.toml already exists, nothing to do.");
            }
            Ok(())
        }
    }
}

fn init_prometheus(
    config: &Config,
) -> anyhow::Result<Option<metrics_exporter_prometheus::PrometheusHandle>> {
    if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Ok(Some(handle))
    } else {
        Ok(None)
    }
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if std::env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false);
        registry.with(fmt_layer).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Danmarr v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let listen = config.server.listen.clone();
    let scheduler_config = config.scheduler.clone();

    let shared = Arc::new(SharedState::new(config).await?);
    let api_state = api::create_app_state(Arc::clone(&shared), prometheus_handle);

    let scheduler = Scheduler::new(Arc::clone(&shared), scheduler_config);
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler error: {}", e);
        }
    });

    let app = api::router(api_state).await;
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    let server_handle = tokio::spawn(async move {
        info!("🌐 API server running at http://{}", listen);
        let service = app.into_make_service_with_connect_info::<std::net::SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            error!("API server error: {}", e);
        }
    });

    info!("Daemon running. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }

    scheduler_handle.abort();
    server_handle.abort();
    info!("Daemon stopped");
    Ok(())
}

async fn run_web(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    let listen = config.server.listen.clone();
    let api_state = api::create_app_state_from_config(config, prometheus_handle).await?;

    let app = api::router(api_state).await;
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("🌐 API server running at http://{}", listen);

    let service = app.into_make_service_with_connect_info::<std::net::SocketAddr>();
    axum::serve(listener, service).await?;
    Ok(())
}

async fn run_single_check(config: Config) -> anyhow::Result<()> {
    info!("Running single scheduler pass...");

    let scheduler_config = config.scheduler.clone();
    let shared = Arc::new(SharedState::new(config).await?);
    let scheduler = Scheduler::new(shared, scheduler_config);
    scheduler.run_once().await?;

    info!("Check complete");
    Ok(())
}
