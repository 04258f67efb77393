//! Follows one job from submission to outcome.
//!
//! [`ProgressConsumer::observe`] spawns a session task that:
//!
//! 1. opens the job WebSocket and subscribes,
//! 2. waits for the `subscribed` ack, so every later write is pushed,
//! 3. fetches the job snapshot and replays its events,
//! 4. treats each live `job_progress` frame as a signal and reads the
//!    events after the last one it yielded, re-syncing from the snapshot
//!    when the socket goes quiet,
//! 5. re-reads the job when a final event or terminal status arrives and
//!    yields the outcome from the row.
//!
//! Events are only yielded from store reads, never straight from a frame,
//! so they come out in insertion order even when a notification is lost.
//! A [`ProgressLog`] keeps an event seen by two reads from being yielded
//! twice. When the socket cannot be opened (or reopened after a drop), or a
//! read fails transiently, the session polls the snapshot instead.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use waypoint_core::job_events::{ACTION_SUBSCRIBE, STATUS_COMPLETED};
use waypoint_core::progress::ProgressLog;
use waypoint_core::types::JobId;

use crate::api::{JobSocket, WaypointApi};
use crate::error::ClientError;
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::wire::{JobSnapshot, JobView, ProgressEvent, ServerFrame};

/// Error recorded when a failed job carries no message.
const UNKNOWN_FAILURE: &str = "The job failed";

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Snapshot interval while polling.
    pub poll_interval: Duration,
    /// Re-sync from the snapshot after this long without a frame.
    pub idle_resync: Duration,
    /// How long to wait for the subscription ack.
    pub ack_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Buffered observations per session.
    pub buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            idle_resync: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            buffer: 64,
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(serde_json::Value),
    Failed(String),
}

impl Outcome {
    fn from_job(job: &JobView) -> Self {
        if job.status == STATUS_COMPLETED {
            Outcome::Completed(job.result.clone().unwrap_or(serde_json::Value::Null))
        } else {
            Outcome::Failed(
                job.error
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_FAILURE.to_string()),
            )
        }
    }
}

/// One item yielded by [`ProgressConsumer::observe`]. `Finished` is always
/// the last item.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Progress(ProgressEvent),
    Finished(Outcome),
}

/// Everything observed for a job, collected by [`ProgressConsumer::wait`].
#[derive(Debug, Clone)]
pub struct JobRun {
    pub events: Vec<ProgressEvent>,
    pub outcome: Outcome,
}

pub struct ProgressConsumer {
    api: WaypointApi,
    config: ConsumerConfig,
    cancel: CancellationToken,
}

impl ProgressConsumer {
    pub fn new(api: WaypointApi, config: ConsumerConfig) -> Self {
        Self {
            api,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Start following `job_id`.
    ///
    /// Progress events arrive in insertion order, each exactly once,
    /// followed by one `Finished`. An `Err`
    /// item ends the stream. Dropping the receiver stops the session.
    pub fn observe(&self, job_id: JobId) -> mpsc::Receiver<Result<Observation, ClientError>> {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let session = Session {
            api: self.api.clone(),
            config: self.config.clone(),
            cancel: self.cancel.child_token(),
            job_id,
            log: ProgressLog::new(),
            tx,
        };
        tokio::spawn(session.run());
        rx
    }

    /// Follow `job_id` to its outcome and return everything observed.
    pub async fn wait(&self, job_id: JobId) -> Result<JobRun, ClientError> {
        let mut rx = self.observe(job_id);
        let mut events = Vec::new();

        while let Some(item) = rx.recv().await {
            match item? {
                Observation::Progress(event) => events.push(event),
                Observation::Finished(outcome) => return Ok(JobRun { events, outcome }),
            }
        }

        Err(ClientError::Connection(
            "Progress session ended before the job finished".into(),
        ))
    }

    /// Stop every running session.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Why a session stopped before reaching an outcome.
enum Stop {
    /// Receiver dropped or consumer closed.
    Detached,
    Failed(ClientError),
}

impl From<ClientError> for Stop {
    fn from(err: ClientError) -> Self {
        Stop::Failed(err)
    }
}

struct Session {
    api: WaypointApi,
    config: ConsumerConfig,
    cancel: CancellationToken,
    job_id: JobId,
    log: ProgressLog<ProgressEvent>,
    tx: mpsc::Sender<Result<Observation, ClientError>>,
}

impl Session {
    async fn run(mut self) {
        match self.follow().await {
            Ok(outcome) => {
                let _ = self.tx.send(Ok(Observation::Finished(outcome))).await;
            }
            Err(Stop::Failed(e)) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Progress session failed");
                let _ = self.tx.send(Err(e)).await;
            }
            Err(Stop::Detached) => {
                tracing::debug!(job_id = %self.job_id, "Progress session detached");
            }
        }
    }

    async fn follow(&mut self) -> Result<Outcome, Stop> {
        if let Some(socket) = self.open().await? {
            if let Some(outcome) = self.stream(socket).await? {
                return Ok(outcome);
            }
        }

        tracing::info!(job_id = %self.job_id, "Following job by polling");
        self.poll().await
    }

    /// Connect, subscribe and wait for the ack. `None` means push is
    /// unavailable.
    async fn open(&mut self) -> Result<Option<JobSocket>, Stop> {
        let Some(mut socket) =
            reconnect_loop(&self.api, &self.config.reconnect, &self.cancel).await
        else {
            if self.cancel.is_cancelled() {
                return Err(Stop::Detached);
            }
            return Ok(None);
        };

        let request = serde_json::json!({
            "action": ACTION_SUBSCRIBE,
            "job_id": self.job_id,
        });
        if let Err(e) = socket.send(Message::Text(request.to_string())).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to send subscription");
            return Ok(None);
        }

        let expected = self.job_id;
        let ack = tokio::time::timeout(self.config.ack_timeout, async {
            while let Some(message) = socket.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(_) => continue,
                    Err(_) => return Ok(false),
                };
                match ServerFrame::parse(&text) {
                    Ok(ServerFrame::Subscribed { job_id }) if job_id == expected => {
                        return Ok(true);
                    }
                    Ok(ServerFrame::Error { code, message }) => {
                        return Err(ClientError::Rejected { code, message });
                    }
                    _ => {}
                }
            }
            Ok(false)
        })
        .await;

        match ack {
            Ok(Ok(true)) => {
                tracing::debug!(job_id = %self.job_id, "Subscribed to job");
                Ok(Some(socket))
            }
            Ok(Ok(false)) => Ok(None),
            Ok(Err(rejected)) => Err(Stop::Failed(rejected)),
            Err(_) => {
                tracing::warn!(job_id = %self.job_id, "Subscription was not acknowledged");
                Ok(None)
            }
        }
    }

    /// Follow the job over `socket`. `None` hands the session over to
    /// polling: the socket was lost for good, or a read failed transiently.
    async fn stream(&mut self, socket: JobSocket) -> Result<Option<Outcome>, Stop> {
        match self.push(socket).await {
            Err(Stop::Failed(e)) if e.is_transient() => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    "Job read failed, switching to polling",
                );
                Ok(None)
            }
            other => other,
        }
    }

    /// Catch up, then apply live frames.
    async fn push(&mut self, mut socket: JobSocket) -> Result<Option<Outcome>, Stop> {
        if let Some(outcome) = self.catch_up().await? {
            return Ok(Some(outcome));
        }

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Stop::Detached),
                next = tokio::time::timeout(self.config.idle_resync, socket.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    if let Some(outcome) = self.catch_up().await? {
                        return Ok(Some(outcome));
                    }
                    continue;
                }
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Job WebSocket error");
                    Message::Close(None)
                }
                Ok(None) => Message::Close(None),
            };

            match message {
                Message::Text(text) => {
                    if let Some(outcome) = self.apply(&text).await? {
                        return Ok(Some(outcome));
                    }
                }
                Message::Close(_) => {
                    tracing::info!(job_id = %self.job_id, "Job WebSocket closed, reconnecting");
                    match self.open().await? {
                        Some(reopened) => {
                            socket = reopened;
                            if let Some(outcome) = self.catch_up().await? {
                                return Ok(Some(outcome));
                            }
                        }
                        None => return Ok(None),
                    }
                }
                _ => {}
            }
        }
    }

    /// Apply one live frame.
    async fn apply(&mut self, text: &str) -> Result<Option<Outcome>, Stop> {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(job_id = %self.job_id, error = %e, "Ignoring unknown frame");
                return Ok(None);
            }
        };

        match frame {
            ServerFrame::JobProgress { job_id, event } if job_id == self.job_id => {
                let after = self.log.last_sequence();
                if after.is_some_and(|last| event.id <= last) {
                    return Ok(None);
                }

                let events = self.api.list_events(self.job_id, after.unwrap_or(0)).await?;
                let finished = events.iter().any(|e| e.is_final);
                self.emit_new(events).await?;
                if finished {
                    return self.catch_up().await;
                }
                Ok(None)
            }
            ServerFrame::JobStatus { job_id, job } if job_id == self.job_id => {
                if job.is_terminal() {
                    return self.catch_up().await;
                }
                Ok(None)
            }
            ServerFrame::Error { code, message } => {
                tracing::warn!(
                    job_id = %self.job_id,
                    code = %code,
                    message = %message,
                    "Server reported an error",
                );
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Poll the snapshot until the job is terminal. Transient failures are
    /// retried at the next tick.
    async fn poll(&mut self) -> Result<Outcome, Stop> {
        loop {
            match self.catch_up().await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(Stop::Failed(e)) if e.is_transient() => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Job poll failed, retrying");
                }
                Err(stop) => return Err(stop),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Stop::Detached),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Read the authoritative snapshot, yield unseen events and return the
    /// outcome if the job is terminal.
    async fn catch_up(&mut self) -> Result<Option<Outcome>, Stop> {
        let JobSnapshot { job, events } = self.api.fetch_job(self.job_id).await?;
        self.emit_new(events).await?;

        Ok(job.is_terminal().then(|| Outcome::from_job(&job)))
    }

    /// Record a batch read from the store and yield the unseen events,
    /// lowest id first.
    async fn emit_new(&mut self, events: Vec<ProgressEvent>) -> Result<(), Stop> {
        for sequence in self.log.accept_all(events) {
            let Some(event) = self.log.get(sequence) else {
                continue;
            };
            let item = Ok(Observation::Progress(event.clone()));
            self.tx.send(item).await.map_err(|_| Stop::Detached)?;
        }
        Ok(())
    }
}
