/// Errors surfaced by [`WaypointApi`](crate::WaypointApi) and
/// [`ProgressConsumer`](crate::ProgressConsumer).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("API error ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The WebSocket could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the subscription (unknown job or not the owner).
    #[error("Subscription rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl ClientError {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Request(_) | ClientError::Connection(_) => true,
            ClientError::Api { status, .. } => *status >= 500 || *status == 408,
            ClientError::Rejected { .. } => false,
        }
    }
}
