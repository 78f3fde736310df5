//! ASR Device Sync
//!
//! Companion service for the ASR home robot: keeps a polled view of the
//! home-automation device, dispatches commands to it, and serves that view to
//! the UI layer over a small local API.

mod api;
mod assistant;
mod config;
mod device;
mod error;
mod hub;
mod models;
mod notify;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::assistant::CannedResponseProvider;
use crate::device::{DeviceClient, DeviceSyncer, SyncHandle, SyncOptions};
use crate::hub::{DeviceSimulator, HubState};
use crate::notify::ToastNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asr_device_sync=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting ASR device sync...");

    // Load configuration
    let config = config::Config::load()?;
    tracing::info!(
        "Configuration loaded (device {} at {})",
        config.device.device_id,
        config.device.base_url
    );

    // Development backend
    if config.hub.enabled {
        start_hub(&config).await?;
    }

    let client = Arc::new(DeviceClient::new(&config.device)?);
    let sync = DeviceSyncer::spawn(client, SyncOptions::from_config(&config));
    let notifier = Arc::new(ToastNotifier::new(config.notifications.history));

    start_background_tasks(&sync, notifier.clone());

    let state = AppState {
        sync: sync.clone(),
        notifier,
        assistant: Arc::new(CannedResponseProvider::new()),
    };

    // Build application router
    let app = api::routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Leaving the screen: no more background calls
    sync.stop();
    tracing::info!("Shut down");

    Ok(())
}

/// Start background tasks (notification collector)
fn start_background_tasks(sync: &SyncHandle, notifier: Arc<ToastNotifier>) {
    let events = sync.subscribe();
    tokio::spawn(async move {
        notifier.start(events).await;
    });

    tracing::info!("Background tasks started");
}

/// Serve the in-memory device hub on its own port, optionally with a simulated device behind it
async fn start_hub(config: &config::Config) -> anyhow::Result<()> {
    let app = hub::routes(&config.device.endpoint_extension)
        .with_state(HubState::default())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.hub.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[DeviceHub] Listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("[DeviceHub] Server stopped: {}", e);
        }
    });

    if config.hub.simulate_device {
        let device_config = config::DeviceConfig {
            base_url: format!("http://127.0.0.1:{}/api", config.hub.port),
            ..config.device.clone()
        };
        let simulator = Arc::new(DeviceSimulator::new(
            Arc::new(DeviceClient::new(&device_config)?),
            config.device.device_id.clone(),
            Duration::from_millis(config.hub.simulator_interval_ms),
        ));
        tokio::spawn(async move {
            simulator.start().await;
        });
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
