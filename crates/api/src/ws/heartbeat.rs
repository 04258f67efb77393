use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Default interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Ping every connection each `period` and drop the ones whose socket task
/// has gone away. Runs until `cancel` fires.
pub fn start_heartbeat(
    ws_manager: Arc<WsManager>,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let pruned = ws_manager.ping_all().await;
            if pruned > 0 {
                tracing::info!(pruned, "Dropped dead WebSocket connections");
            }
            let count = ws_manager.connection_count().await;
            tracing::debug!(
                count,
                "WebSocket heartbeat ping",
            );
        }

        tracing::debug!("WebSocket heartbeat stopped");
    })
}
