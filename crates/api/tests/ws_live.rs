//! End-to-end WebSocket tests against a real server on an ephemeral port,
//! with in-process workers and the channel router wired to one event bus.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use sqlx::PgPool;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use waypoint_api::channel::ChannelRouter;
use waypoint_api::router::build_app_router;
use waypoint_core::types::{JobId, TriggeredBy};
use waypoint_db::models::job::CreateJob;
use waypoint_db::repositories::JobRepo;
use waypoint_events::{EventBus, Publisher};
use waypoint_worker::workflows::builtin_registry;
use waypoint_worker::{Dispatch, WorkerConfig, WorkerPool, WorkerServices};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ALICE: i64 = 1;
const BOB: i64 = 2;

struct TestServer {
    addr: SocketAddr,
    workers: WorkerPool,
    services: WorkerServices,
    cancel: CancellationToken,
}

impl TestServer {
    /// Serve the full router. The dispatcher poll is pushed far out so jobs
    /// only run when a test hands them to the pool.
    async fn start(pool: PgPool) -> Self {
        let bus = Arc::new(EventBus::default());
        let worker_config = WorkerConfig {
            poll_interval_ms: 60_000,
            ..WorkerConfig::default()
        };
        let services = WorkerServices::spawn(
            pool.clone(),
            Arc::new(builtin_registry()),
            Publisher::Bus(Arc::clone(&bus)),
            &worker_config,
        );
        let workers = services.workers();
        let state = common::build_test_state(pool.clone(), Some(workers.clone()));

        let cancel = CancellationToken::new();
        let router = ChannelRouter::new(pool, Arc::clone(&state.ws_manager));
        tokio::spawn(router.run(bus.subscribe(), cancel.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_app_router(state);
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            workers,
            services,
            cancel,
        }
    }

    async fn connect(&self, user_id: i64) -> Socket {
        let url = format!(
            "ws://{}/api/v1/ws?token={}",
            self.addr,
            common::token_for(user_id)
        );
        let (socket, _) = connect_async(url).await.expect("upgrade should succeed");
        socket
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.services.shutdown(Duration::from_secs(5)).await;
    }
}

async fn pending_job(pool: &PgPool, owner_id: i64, payload: serde_json::Value) -> JobId {
    JobRepo::create(
        pool,
        &CreateJob {
            owner_id,
            job_type: "batch_echo".into(),
            triggered_by: TriggeredBy::User,
            payload,
        },
    )
    .await
    .unwrap()
    .id
}

async fn send_action(socket: &mut Socket, action: &str, job_id: JobId) {
    let frame = json!({ "action": action, "job_id": job_id }).to_string();
    socket.send(Message::Text(frame)).await.unwrap();
}

/// Next JSON text frame, skipping control frames.
async fn next_frame(socket: &mut Socket) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("frame should arrive")
            .expect("socket should stay open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn subscriber_sees_every_event_then_the_final_status(pool: PgPool) {
    let server = TestServer::start(pool.clone()).await;
    let job_id = pending_job(&pool, ALICE, json!({ "items": ["a", "b"], "delay_ms": 100 })).await;

    let mut socket = server.connect(ALICE).await;
    send_action(&mut socket, "subscribe", job_id).await;
    let ack = next_frame(&mut socket).await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["job_id"], job_id.to_string());

    assert!(
        server
            .workers
            .try_dispatch(Dispatch {
                job_id,
                owner_id: ALICE,
            })
            .await
    );

    let mut seen = Vec::new();
    loop {
        let frame = next_frame(&mut socket).await;
        match frame["type"].as_str().unwrap() {
            "job_progress" => {
                seen.push(frame["event"]["step_label"].as_str().unwrap().to_string());
            }
            "job_status" => {
                let status = frame["job"]["status"].as_str().unwrap().to_string();
                let terminal = status == "completed";
                seen.push(format!("status:{status}"));
                if terminal {
                    assert_eq!(frame["job"]["result"], json!({ "items": ["a", "b"] }));
                    break;
                }
            }
            other => panic!("unexpected frame type {other}"),
        }
    }

    assert_eq!(
        seen,
        [
            "status:running",
            "item 1/2",
            "item 2/2",
            "completed",
            "status:completed",
        ]
    );

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn subscribing_to_another_users_job_is_refused(pool: PgPool) {
    let server = TestServer::start(pool.clone()).await;
    let job_id = pending_job(&pool, ALICE, json!({ "items": ["x"] })).await;

    let mut socket = server.connect(BOB).await;
    send_action(&mut socket, "subscribe", job_id).await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "FORBIDDEN");

    // Nothing about the job reaches Bob while it runs.
    server
        .workers
        .try_dispatch(Dispatch {
            job_id,
            owner_id: ALICE,
        })
        .await;
    let quiet = tokio::time::timeout(Duration::from_millis(500), socket.next()).await;
    assert!(quiet.is_err(), "no frames expected for a refused subscription");

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn malformed_frames_get_an_error_reply(pool: PgPool) {
    let server = TestServer::start(pool).await;

    let mut socket = server.connect(ALICE).await;
    socket
        .send(Message::Text("{\"action\":\"subscribe\"}".into()))
        .await
        .unwrap();

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "BAD_REQUEST");

    server.stop().await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upgrade_without_token_is_rejected(pool: PgPool) {
    let server = TestServer::start(pool).await;

    let url = format!("ws://{}/api/v1/ws", server.addr);
    let err = connect_async(url).await.expect_err("upgrade must fail");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }

    server.stop().await;
}
