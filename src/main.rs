//! Journey - travel time sensors for Home Assistant
//!
//! Follows entity states over MQTT statestream, asks Google Maps or HERE for
//! the travel time of each configured journey and publishes the result as a
//! sensor.
//!
//! Module structure:
//! - `domain/` - Entity states and journey snapshots
//! - `io/` - External interfaces (routing APIs, MQTT, Prometheus)
//! - `services/` - Location resolution, coordinators, sensors, setup
//! - `infra/` - Infrastructure (Config, Metrics, StateStore)

use anyhow::bail;
use clap::Parser;
use journey::infra::{Config, Metrics, StateStore};
use journey::io::{JourneyGauge, SensorPublisher};
use journey::services::{check_credentials, start_journeys};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Journey - travel time sensors backed by Google Maps or HERE
#[derive(Parser, Debug)]
#[command(name = "journey", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/journey.toml")]
    config: String,

    /// Validate every journey's API credentials and exit
    #[arg(long)]
    check_credentials: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "journey starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        statestream_base = %config.statestream_base_topic(),
        egress_enabled = %config.egress_enabled(),
        scan_interval_secs = %config.scan_interval().as_secs(),
        cooldown_secs = %config.request_refresh_cooldown().as_secs(),
        zones = %config.zones().len(),
        journeys = %config.journeys().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    if args.check_credentials {
        let failed = check_credentials(&config).await;
        if !failed.is_empty() {
            bail!("invalid credentials for journeys: {}", failed.join(", "));
        }
        info!("all credentials valid");
        return Ok(());
    }

    if config.journeys().is_empty() {
        warn!("no_journeys_configured");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared state: zones first, then whatever the statestream mirrors
    let store = Arc::new(StateStore::new());
    for zone in config.zones() {
        store.add_zone(zone);
    }
    let metrics = Arc::new(Metrics::new());

    let statestream_config = config.clone();
    let statestream_store = store.clone();
    let statestream_metrics = metrics.clone();
    let statestream_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = journey::io::statestream::start_statestream(
            &statestream_config,
            statestream_store,
            statestream_metrics,
            statestream_shutdown,
        )
        .await
        {
            error!(error = %e, "statestream_error");
        }
    });

    let mut tasks = Vec::new();

    let egress_tx = if config.egress_enabled() {
        let (egress_tx, egress_rx) = mpsc::channel(100);
        let publisher = SensorPublisher::new(&config, egress_rx);
        tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));
        Some(egress_tx)
    } else {
        None
    };

    let journeys = start_journeys(
        &config,
        store.clone(),
        metrics.clone(),
        egress_tx,
        shutdown_rx.clone(),
    )
    .await;
    info!(started = %journeys.len(), configured = %config.journeys().len(), "journeys_started");

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let gauges: Vec<JourneyGauge> = journeys
            .iter()
            .map(|j| JourneyGauge { id: j.id.clone(), updates: j.updates.clone() })
            .collect();
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = journey::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                gauges,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    for handle in journeys {
        tasks.extend(handle.tasks);
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "task_join_failed");
        }
    }

    info!("journey shutdown complete");
    Ok(())
}
