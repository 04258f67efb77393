//! Tests for `ChannelRouter`: bus updates become WebSocket frames for the
//! owner's subscribed connections, built from the stored rows.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use waypoint_api::channel::ChannelRouter;
use waypoint_api::ws::WsManager;
use waypoint_core::types::{JobId, TriggeredBy};
use waypoint_db::models::job::CreateJob;
use waypoint_db::models::progress_event::NewProgressEvent;
use waypoint_db::repositories::{JobRepo, ProgressEventRepo};
use waypoint_events::{EventBus, JobUpdate};

const ALICE: i64 = 1;
const BOB: i64 = 2;

async fn running_job(pool: &PgPool, owner_id: i64) -> JobId {
    let job = JobRepo::create(
        pool,
        &CreateJob {
            owner_id,
            job_type: "echo".into(),
            triggered_by: TriggeredBy::User,
            payload: json!({ "text": "hi" }),
        },
    )
    .await
    .unwrap();
    JobRepo::claim(pool, job.id).await.unwrap().unwrap();
    job.id
}

async fn append(pool: &PgPool, job_id: JobId, label: &str) -> i64 {
    ProgressEventRepo::append(
        pool,
        job_id,
        &NewProgressEvent {
            step_label: label.into(),
            percent: Some(50),
            detail: None,
        },
    )
    .await
    .unwrap()
    .unwrap()
    .id
}

fn frame(message: Message) -> serde_json::Value {
    match message {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Register a connection subscribed to `job_id` and drain its ack.
async fn subscribed(
    manager: &WsManager,
    conn_id: &str,
    user_id: i64,
    job_id: JobId,
) -> UnboundedReceiver<Message> {
    let mut rx = manager.add(conn_id.to_string(), user_id).await;
    manager
        .subscribe(conn_id, job_id, Message::Text("ack".into()))
        .await;
    rx.try_recv().unwrap();
    rx
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn progress_update_is_sent_as_stored_row(pool: PgPool) {
    let manager = Arc::new(WsManager::new());
    let job_id = running_job(&pool, ALICE).await;
    let mut rx = subscribed(&manager, "alice", ALICE, job_id).await;

    let event_id = append(&pool, job_id, "halfway").await;
    let router = ChannelRouter::new(pool.clone(), Arc::clone(&manager));
    let delivered = router
        .route(&JobUpdate::progress(job_id, ALICE, event_id))
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    let json = frame(rx.try_recv().unwrap());
    assert_eq!(json["type"], "job_progress");
    assert_eq!(json["job_id"], job_id.to_string());
    assert_eq!(json["event"]["id"], event_id);
    assert_eq!(json["event"]["step_label"], "halfway");
    assert_eq!(json["event"]["is_final"], false);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn status_update_carries_the_current_job(pool: PgPool) {
    let manager = Arc::new(WsManager::new());
    let job_id = running_job(&pool, ALICE).await;
    let mut rx = subscribed(&manager, "alice", ALICE, job_id).await;

    JobRepo::complete(&pool, job_id, &json!({ "text": "hi" }))
        .await
        .unwrap()
        .unwrap();

    let router = ChannelRouter::new(pool.clone(), Arc::clone(&manager));
    router
        .route(&JobUpdate::status(job_id, ALICE, "completed"))
        .await
        .unwrap();

    let json = frame(rx.try_recv().unwrap());
    assert_eq!(json["type"], "job_status");
    assert_eq!(json["job"]["status"], "completed");
    assert_eq!(json["job"]["result"], json!({ "text": "hi" }));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn other_principals_never_receive_the_update(pool: PgPool) {
    let manager = Arc::new(WsManager::new());
    let job_id = running_job(&pool, ALICE).await;
    let mut bob = subscribed(&manager, "bob", BOB, job_id).await;
    let mut unsubscribed = manager.add("alice-idle".to_string(), ALICE).await;

    let event_id = append(&pool, job_id, "secret").await;
    let router = ChannelRouter::new(pool.clone(), Arc::clone(&manager));
    let delivered = router
        .route(&JobUpdate::progress(job_id, ALICE, event_id))
        .await
        .unwrap();

    assert_eq!(delivered, 0);
    assert!(bob.try_recv().is_err());
    assert!(unsubscribed.try_recv().is_err());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn update_for_a_missing_event_is_dropped(pool: PgPool) {
    let manager = Arc::new(WsManager::new());
    let job_id = running_job(&pool, ALICE).await;
    let mut rx = subscribed(&manager, "alice", ALICE, job_id).await;

    let router = ChannelRouter::new(pool.clone(), Arc::clone(&manager));
    let delivered = router
        .route(&JobUpdate::progress(job_id, ALICE, 999_999))
        .await
        .unwrap();

    assert_eq!(delivered, 0);
    assert!(rx.try_recv().is_err());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn run_loop_delivers_bus_updates_in_order(pool: PgPool) {
    let manager = Arc::new(WsManager::new());
    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let job_id = running_job(&pool, ALICE).await;
    let mut rx = subscribed(&manager, "alice", ALICE, job_id).await;

    let router = ChannelRouter::new(pool.clone(), Arc::clone(&manager));
    let handle = tokio::spawn(router.run(bus.subscribe(), cancel.clone()));

    let first = append(&pool, job_id, "one").await;
    let second = append(&pool, job_id, "two").await;
    bus.publish(JobUpdate::progress(job_id, ALICE, first));
    bus.publish(JobUpdate::progress(job_id, ALICE, second));

    let mut ids = Vec::new();
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("update should arrive")
            .unwrap();
        ids.push(frame(message)["event"]["id"].as_i64().unwrap());
    }
    assert_eq!(ids, [first, second]);

    cancel.cancel();
    handle.await.unwrap();
}
