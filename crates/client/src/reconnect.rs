//! Exponential-backoff reconnection for the job WebSocket.
//!
//! When the socket cannot be opened or drops, the consumer calls
//! [`reconnect_loop`] to retry with increasing delays. Unlike a service
//! bridge, a consumer gives up after [`ReconnectConfig::max_attempts`] and
//! polls instead.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{JobSocket, WaypointApi};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Open the job WebSocket, retrying with exponential backoff.
///
/// Returns `None` once `max_attempts` connections failed or `cancel`
/// fired.
pub async fn reconnect_loop(
    api: &WaypointApi,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<JobSocket> {
    let mut delay = config.initial_delay;
    let attempts = config.max_attempts.max(1);

    for attempt in 1..=attempts {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = api.connect() => match result {
                Ok(socket) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Reconnected to job WebSocket");
                    }
                    return Some(socket);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket attempt {attempt} of {attempts} failed");
                }
            },
        }

        if attempt == attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, config);
    }

    None
}
