use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypoint_api::channel::ChannelRouter;
use waypoint_api::config::ServerConfig;
use waypoint_api::state::AppState;
use waypoint_api::{router, ws};
use waypoint_events::{EventBus, PgRelay, Publisher};
use waypoint_worker::workflows::builtin_registry;
use waypoint_worker::{shutdown_signal, SubmissionService, WorkerServices};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypoint_api=debug,waypoint_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        worker_in_process = config.worker_in_process,
        "Loaded server configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = waypoint_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    waypoint_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    waypoint_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());

    // --- Event bus and progress channel ---
    let event_bus = Arc::new(EventBus::default());
    let channel_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&ws_manager),
        ws::HEARTBEAT_INTERVAL,
        channel_cancel.clone(),
    );

    let channel_router = ChannelRouter::new(pool.clone(), Arc::clone(&ws_manager));
    let router_handle = tokio::spawn(channel_router.run(event_bus.subscribe(), channel_cancel.clone()));

    // Updates from standalone worker processes arrive through NOTIFY.
    let relay = PgRelay::connect(&pool)
        .await
        .expect("Failed to start job update listener");
    let relay_handle = tokio::spawn(relay.run(Arc::clone(&event_bus), channel_cancel.clone()));

    tracing::info!("Progress channel started (router, relay)");

    // --- Workers ---
    let registry = Arc::new(builtin_registry());
    let worker_services = config.worker_in_process.then(|| {
        WorkerServices::spawn(
            pool.clone(),
            Arc::clone(&registry),
            Publisher::Bus(Arc::clone(&event_bus)),
            &config.worker,
        )
    });
    let submissions = SubmissionService::new(
        pool.clone(),
        Arc::clone(&registry),
        worker_services.as_ref().map(WorkerServices::workers),
    );

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        registry,
        submissions,
    };

    let app = router::build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Let running jobs finish first so their final updates still reach clients.
    if let Some(services) = worker_services {
        services.shutdown(config.shutdown_timeout()).await;
    }

    channel_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), router_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), relay_handle).await;
    tracing::info!("Progress channel shut down");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    let _ = heartbeat_handle.await;
    tracing::info!("Graceful shutdown complete");
}
