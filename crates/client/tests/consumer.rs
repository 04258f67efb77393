//! End-to-end tests: a real API server with in-process workers on an
//! ephemeral port, followed by `ProgressConsumer`s over HTTP and WebSocket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use waypoint_api::auth::jwt::{generate_access_token, JwtConfig};
use waypoint_api::channel::ChannelRouter;
use waypoint_api::config::ServerConfig;
use waypoint_api::router::build_app_router;
use waypoint_api::routes;
use waypoint_api::state::AppState;
use waypoint_api::ws::WsManager;
use waypoint_client::{
    ClientError, ConsumerConfig, Observation, Outcome, ProgressConsumer, ReconnectConfig,
    WaypointApi,
};
use waypoint_core::error::CoreError;
use waypoint_core::job_events::STATUS_COMPLETED;
use waypoint_core::types::{JobId, TriggeredBy};
use waypoint_core::workflow::{
    StepContext, StepError, StepOutcome, Workflow, WorkflowDescriptor,
};
use waypoint_db::models::job::CreateJob;
use waypoint_db::models::progress_event::NewProgressEvent;
use waypoint_db::repositories::{JobRepo, ProgressEventRepo};
use waypoint_events::{EventBus, JobUpdate, Publisher};
use waypoint_worker::workflows::builtin_registry;
use waypoint_worker::{SubmissionService, WorkerConfig, WorkerServices};

const ALICE: i64 = 1;
const BOB: i64 = 2;
const JWT_SECRET: &str = "client-test-secret-long-enough-for-hs256";

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct AlwaysFails;

#[async_trait]
impl Workflow for AlwaysFails {
    fn job_type(&self) -> &'static str {
        "always_fails"
    }

    fn descriptor(&self) -> WorkflowDescriptor {
        WorkflowDescriptor {
            expected_duration_ms: 1,
            step_count: 1,
            external_lookups: false,
        }
    }

    fn validate(&self, _payload: &serde_json::Value) -> Result<(), CoreError> {
        Ok(())
    }

    async fn step(&self, _ctx: StepContext<'_>) -> Result<StepOutcome, StepError> {
        Err(StepError::Terminal("The destination could not be found".into()))
    }
}

fn server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".into()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        worker_in_process: true,
        jwt: JwtConfig {
            secret: JWT_SECRET.into(),
            access_token_expiry_mins: 15,
        },
        worker: WorkerConfig::default(),
    }
}

/// What the test server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    /// Full router, WebSocket included.
    Push,
    /// Only the job routes, so WebSocket upgrades fail and consumers poll.
    PollOnly,
    /// Full router whose first job snapshot request answers 503.
    FlakySnapshot,
}

/// Answer the first `GET /api/v1/jobs/{id}` with 503.
async fn fail_first_snapshot(
    State(tripped): State<Arc<AtomicBool>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let is_snapshot = request.method() == Method::GET
        && path.starts_with("/api/v1/jobs/")
        && !path.ends_with("/events");

    if is_snapshot && !tripped.swap(true, Ordering::SeqCst) {
        let body = json!({ "error": "Try again shortly", "code": "UNAVAILABLE" });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    next.run(request).await
}

struct Server {
    base_url: String,
    bus: Arc<EventBus>,
    ws_manager: Arc<WsManager>,
    services: Option<WorkerServices>,
    snapshot_failed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Server {
    /// Server with in-process workers.
    async fn start(pool: PgPool, surface: Surface) -> Self {
        Self::launch(pool, surface, true).await
    }

    /// Full server without workers. Tests write progress and publish
    /// updates themselves.
    async fn manual(pool: PgPool) -> Self {
        Self::launch(pool, Surface::Push, false).await
    }

    async fn launch(pool: PgPool, surface: Surface, workers: bool) -> Self {
        let config = server_config();
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(builtin_registry().with(AlwaysFails));
        let services = workers.then(|| {
            WorkerServices::spawn(
                pool.clone(),
                Arc::clone(&registry),
                Publisher::Bus(Arc::clone(&bus)),
                &config.worker,
            )
        });
        let ws_manager = Arc::new(WsManager::new());
        let state = AppState {
            pool: pool.clone(),
            config: Arc::new(config),
            ws_manager: Arc::clone(&ws_manager),
            submissions: SubmissionService::new(
                pool.clone(),
                Arc::clone(&registry),
                services.as_ref().map(WorkerServices::workers),
            ),
            registry,
        };

        let cancel = CancellationToken::new();
        tokio::spawn(
            ChannelRouter::new(pool, Arc::clone(&ws_manager)).run(bus.subscribe(), cancel.clone()),
        );

        let snapshot_failed = Arc::new(AtomicBool::new(false));
        let app = match surface {
            Surface::Push => build_app_router(state),
            Surface::PollOnly => Router::new()
                .nest("/api/v1", Router::new().nest("/jobs", routes::jobs::router()))
                .with_state(state),
            Surface::FlakySnapshot => build_app_router(state).layer(
                middleware::from_fn_with_state(Arc::clone(&snapshot_failed), fail_first_snapshot),
            ),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        Self {
            base_url,
            bus,
            ws_manager,
            services,
            snapshot_failed,
            cancel,
        }
    }

    fn api(&self, user_id: i64) -> WaypointApi {
        let token = generate_access_token(user_id, "user", &server_config().jwt).unwrap();
        WaypointApi::new(self.base_url.clone(), token)
    }

    fn consumer(&self, user_id: i64) -> ProgressConsumer {
        let config = ConsumerConfig {
            poll_interval: Duration::from_millis(50),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_attempts: 1,
                ..ReconnectConfig::default()
            },
            ..ConsumerConfig::default()
        };
        ProgressConsumer::new(self.api(user_id), config)
    }

    /// Wait until `owner_id` has a connection subscribed to `job_id`.
    async fn wait_for_subscriber(&self, owner_id: i64, job_id: JobId) {
        for _ in 0..250 {
            let ping = Message::Ping(Bytes::new());
            if self.ws_manager.send_to_subscribers(owner_id, job_id, ping).await > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no subscriber for job {job_id}");
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Some(services) = self.services {
            services.shutdown(Duration::from_secs(5)).await;
        }
    }
}

fn step(label: &str) -> NewProgressEvent {
    NewProgressEvent {
        step_label: label.into(),
        percent: None,
        detail: None,
    }
}

fn labels(events: &[waypoint_client::wire::ProgressEvent]) -> Vec<&str> {
    events.iter().map(|e| e.step_label.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn echo_job_is_followed_to_completion(pool: PgPool) {
    let server = Server::start(pool, Surface::Push).await;

    let job_id = server
        .api(ALICE)
        .submit("echo", &json!({ "text": "hello" }))
        .await
        .unwrap();
    let run = server.consumer(ALICE).wait(job_id).await.unwrap();

    assert_eq!(labels(&run.events), ["processing", "completed"]);
    assert!(run.events.last().unwrap().is_final);
    assert_eq!(run.outcome, Outcome::Completed(json!({ "text": "hello" })));

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn early_and_late_consumers_see_identical_histories(pool: PgPool) {
    let server = Server::start(pool.clone(), Surface::Push).await;

    let job_id = server
        .api(ALICE)
        .submit(
            "batch_echo",
            &json!({ "items": ["a", "b", "c", "d"], "delay_ms": 150 }),
        )
        .await
        .unwrap();

    let early = server.consumer(ALICE);
    let early_run = tokio::spawn(async move { early.wait(job_id).await });

    // Join once some events exist, so the late consumer needs catch-up.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let late_run = server.consumer(ALICE).wait(job_id).await.unwrap();
    let early_run = early_run.await.unwrap().unwrap();

    let ids = |events: &[waypoint_client::wire::ProgressEvent]| -> Vec<i64> {
        events.iter().map(|e| e.id).collect()
    };
    assert_eq!(ids(&early_run.events), ids(&late_run.events));
    assert_eq!(
        labels(&late_run.events),
        ["item 1/4", "item 2/4", "item 3/4", "item 4/4", "completed"]
    );

    let stored: Vec<i64> = ProgressEventRepo::list_for_job(&pool, job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids(&late_run.events), stored);
    assert_eq!(early_run.outcome, late_run.outcome);

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn failed_job_yields_its_summary(pool: PgPool) {
    let server = Server::start(pool, Surface::Push).await;

    let job_id = server
        .api(ALICE)
        .submit("always_fails", &json!({}))
        .await
        .unwrap();
    let run = server.consumer(ALICE).wait(job_id).await.unwrap();

    assert_eq!(
        run.outcome,
        Outcome::Failed("The destination could not be found".into())
    );
    let last = run.events.last().unwrap();
    assert_eq!(last.step_label, "failed");
    assert_eq!(
        last.detail,
        Some(json!({ "error": "The destination could not be found" }))
    );

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn finished_job_is_replayed_from_the_snapshot(pool: PgPool) {
    let server = Server::start(pool, Surface::Push).await;
    let api = server.api(ALICE);

    let job_id = api.submit("echo", &json!({ "text": "done" })).await.unwrap();
    let first = server.consumer(ALICE).wait(job_id).await.unwrap();
    let replay = server.consumer(ALICE).wait(job_id).await.unwrap();

    assert_eq!(first.events, replay.events);
    assert_eq!(replay.outcome, Outcome::Completed(json!({ "text": "done" })));

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn consumer_polls_when_push_is_unavailable(pool: PgPool) {
    let server = Server::start(pool, Surface::PollOnly).await;

    let job_id = server
        .api(ALICE)
        .submit("batch_echo", &json!({ "items": ["x", "y"], "delay_ms": 50 }))
        .await
        .unwrap();
    let run = server.consumer(ALICE).wait(job_id).await.unwrap();

    assert_eq!(labels(&run.events), ["item 1/2", "item 2/2", "completed"]);
    assert_eq!(run.outcome, Outcome::Completed(json!({ "items": ["x", "y"] })));

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn observing_another_users_job_is_rejected(pool: PgPool) {
    let server = Server::start(pool, Surface::Push).await;

    let job_id = server
        .api(ALICE)
        .submit("echo", &json!({ "text": "mine" }))
        .await
        .unwrap();

    let mut rx = server.consumer(BOB).observe(job_id);
    let first = rx.recv().await.expect("session should report");
    assert_matches!(first, Err(ClientError::Rejected { code, .. }) if code == "FORBIDDEN");
    assert!(rx.recv().await.is_none());

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn polling_another_users_job_is_rejected(pool: PgPool) {
    let server = Server::start(pool, Surface::PollOnly).await;

    let job_id = server
        .api(ALICE)
        .submit("echo", &json!({ "text": "mine" }))
        .await
        .unwrap();

    let err = server.consumer(BOB).wait(job_id).await.unwrap_err();
    assert_matches!(err, ClientError::Api { status: 403, .. });

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn invalid_submission_reports_the_server_code(pool: PgPool) {
    let server = Server::start(pool, Surface::Push).await;

    let err = server
        .api(ALICE)
        .submit("echo", &json!({ "text": "" }))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ClientError::Api { status: 400, ref code, .. } if code == "INVALID_PAYLOAD"
    );

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn observations_end_with_finished(pool: PgPool) {
    let server = Server::start(pool, Surface::Push).await;

    let job_id = server
        .api(ALICE)
        .submit("batch_echo", &json!({ "items": ["p", "q", "r"] }))
        .await
        .unwrap();

    let mut rx = server.consumer(ALICE).observe(job_id);
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item.unwrap());
    }

    assert_eq!(items.len(), 5);
    assert_matches!(items.last(), Some(Observation::Finished(Outcome::Completed(_))));
    assert!(items[..4]
        .iter()
        .all(|o| matches!(o, Observation::Progress(_))));

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn lost_notification_does_not_reorder_events(pool: PgPool) {
    let server = Server::manual(pool.clone()).await;

    let job = JobRepo::create(
        &pool,
        &CreateJob {
            owner_id: ALICE,
            job_type: "batch_echo".into(),
            triggered_by: TriggeredBy::User,
            payload: json!({ "items": ["a", "b"] }),
        },
    )
    .await
    .unwrap();
    JobRepo::claim(&pool, job.id).await.unwrap().unwrap();

    let mut rx = server.consumer(ALICE).observe(job.id);
    server.wait_for_subscriber(ALICE, job.id).await;
    // Let the initial catch-up finish so the events below arrive live.
    tokio::time::sleep(Duration::from_millis(200)).await;

    ProgressEventRepo::append(&pool, job.id, &step("step 1"))
        .await
        .unwrap()
        .unwrap();
    let second = ProgressEventRepo::append(&pool, job.id, &step("step 2"))
        .await
        .unwrap()
        .unwrap();
    // Only the second write is announced.
    server.bus.publish(JobUpdate::progress(job.id, ALICE, second.id));

    let write = JobRepo::complete(&pool, job.id, &json!({ "items": ["a", "b"] }))
        .await
        .unwrap()
        .unwrap();
    server.bus.publish(JobUpdate::progress(job.id, ALICE, write.event.id));
    server.bus.publish(JobUpdate::status(job.id, ALICE, STATUS_COMPLETED));

    let mut events = Vec::new();
    let mut outcome = None;
    while let Some(item) = rx.recv().await {
        match item.unwrap() {
            Observation::Progress(event) => events.push(event),
            Observation::Finished(finished) => outcome = Some(finished),
        }
    }

    assert_eq!(labels(&events), ["step 1", "step 2", "completed"]);
    let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert_eq!(
        outcome,
        Some(Outcome::Completed(json!({ "items": ["a", "b"] })))
    );

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn transient_snapshot_failure_falls_back_to_polling(pool: PgPool) {
    let server = Server::start(pool, Surface::FlakySnapshot).await;

    let job_id = server
        .api(ALICE)
        .submit("batch_echo", &json!({ "items": ["x", "y"], "delay_ms": 50 }))
        .await
        .unwrap();
    let run = server.consumer(ALICE).wait(job_id).await.unwrap();

    assert!(server.snapshot_failed.load(Ordering::SeqCst));
    assert_eq!(labels(&run.events), ["item 1/2", "item 2/2", "completed"]);
    assert_eq!(run.outcome, Outcome::Completed(json!({ "items": ["x", "y"] })));

    server.stop().await;
}
