//! REST client for the Waypoint job endpoints.
//!
//! Wraps `/api/v1/jobs` using [`reqwest`] and derives the WebSocket URL
//! the [`ProgressConsumer`](crate::ProgressConsumer) subscribes on.

use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use waypoint_core::types::{DbId, JobId};

use crate::error::ClientError;
use crate::wire::{DataResponse, ErrorBody, JobSnapshot, ProgressEvent, SubmittedJob};

/// A live job WebSocket.
pub type JobSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Authenticated HTTP client for one Waypoint server.
#[derive(Clone)]
pub struct WaypointApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl WaypointApi {
    /// * `base_url` - server root, e.g. `http://host:3000`.
    /// * `token`    - bearer token identifying the principal.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a job. Returns as soon as the server has stored it.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: &serde_json::Value,
    ) -> Result<JobId, ClientError> {
        let body = serde_json::json!({
            "job_type": job_type,
            "payload": payload,
        });

        let response = self
            .client
            .post(self.url("/jobs"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let submitted: SubmittedJob = Self::parse_response(response).await?;
        Ok(submitted.job_id)
    }

    /// Fetch the job row and all of its progress events.
    pub async fn fetch_job(&self, job_id: JobId) -> Result<JobSnapshot, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{job_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Progress events with an id greater than `after`, oldest first.
    pub async fn list_events(
        &self,
        job_id: JobId,
        after: DbId,
    ) -> Result<Vec<ProgressEvent>, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{job_id}/events")))
            .query(&[("after", after)])
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Open the job WebSocket. The token travels as a query parameter since
    /// browsers cannot set headers on an upgrade request.
    pub async fn connect(&self) -> Result<JobSocket, ClientError> {
        let url = format!("{}?token={}", self.ws_url(), self.token);
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| ClientError::Connection(format!("{}: {e}", self.ws_url())))?;

        tracing::debug!(url = %self.ws_url(), "Job WebSocket connected");
        Ok(socket)
    }

    /// WebSocket endpoint without credentials.
    pub fn ws_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/api/v1/ws")
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    /// Unwrap the `{ "data": ... }` envelope of a success response, or turn
    /// the `{ "error", "code" }` body of a failure into [`ClientError::Api`].
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => (err.code, err.error),
                Err(_) => ("UNKNOWN".to_string(), body),
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let envelope: DataResponse<T> = response.json().await?;
        Ok(envelope.data)
    }
}
