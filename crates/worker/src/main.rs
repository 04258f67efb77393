use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypoint_events::{PgNotifier, Publisher};
use waypoint_worker::workflows::builtin_registry;
use waypoint_worker::{shutdown_signal, WorkerConfig, WorkerServices};

/// How long running jobs may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypoint_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        concurrency = config.concurrency,
        poll_interval_ms = config.poll_interval_ms,
        "Loaded worker configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = waypoint_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    waypoint_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    waypoint_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    // --- Workers ---
    // Updates travel to the API server through NOTIFY.
    let publisher = Publisher::Postgres(PgNotifier::new(pool.clone()));
    let registry = Arc::new(builtin_registry());
    tracing::info!(workflows = registry.len(), "Workflow registry loaded");

    let services = WorkerServices::spawn(pool, registry, publisher, &config);

    shutdown_signal().await;

    services.shutdown(DRAIN_TIMEOUT).await;
    tracing::info!("Graceful shutdown complete");
}
