//! Room Controller
//!
//! Distributed room lifecycle and presence control plane.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to Redis (`RedisStore`)
//! 4. Connect to Postgres and run migrations
//! 5. Create the media engine client
//! 6. Build the component graph (`RoomServices`)
//! 7. Spawn the janitor
//! 8. Start health HTTP server (liveness, readiness, metrics)
//! 9. Wait for shutdown signal, then release agent leases

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::agents::LoggingAgentFactory;
use room_controller::clock::SystemClock;
use room_controller::config::Config;
use room_controller::context::{Backends, RoomServices, ServiceSettings};
use room_controller::observability::{health_router, HealthState};
use room_controller::repositories::PgRoomRepository;
use room_controller::services::{LiveKitClient, TracingEventSink};
use room_controller::store::RedisStore;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Maximum Postgres connections per instance.
const DB_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_controller=debug,tower_http=info".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        instance_id = %config.instance_id,
        media_url = %config.media.url,
        health_bind_address = %config.health_bind_address,
        artifacts_dir = ?config.janitor.artifacts_dir,
        "Starting Room Controller"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to Redis...");
    let store = RedisStore::connect(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    info!("Redis connection established");

    info!("Connecting to Postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Postgres");
            e
        })?;
    sqlx::migrate!("../../migrations").run(&pool).await.map_err(|e| {
        error!(error = %e, "Failed to run database migrations");
        e
    })?;
    info!("Postgres connection established, migrations applied");
    health_state.mark_stores_connected();

    let media = LiveKitClient::new(&config.media).map_err(|e| {
        error!(error = %e, "Failed to create media engine client");
        e
    })?;

    let root_token = CancellationToken::new();
    let services = RoomServices::new(
        Backends {
            store: Arc::new(store),
            rooms: Arc::new(PgRoomRepository::new(pool)),
            media: Arc::new(media),
            events: Arc::new(TracingEventSink),
            agent_factory: Arc::new(LoggingAgentFactory),
            clock: Arc::new(SystemClock),
        },
        ServiceSettings::from(&config),
        &root_token,
    );

    tokio::spawn(services.janitor.clone().run(root_token.child_token()));
    health_state.mark_janitor_running();
    info!("Janitor started");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let app = health_router(Arc::clone(&health_state), Some(prometheus_handle))
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = root_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("Room Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.begin_shutdown();
    root_token.cancel();

    // Release every agent lease so other instances can take over at once
    services.agents.shutdown().await;

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
