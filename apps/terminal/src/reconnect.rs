use std::{sync::Arc, time::Duration};

use client_core::{CloseReason, CoreUpdate, LiveEventStream, LiveStreamConfig, StreamEvent, SyncClient};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnects in the background after `delay`.
///
/// A new stream is handed back through `reconnected`. A failed or timed-out
/// attempt queues another close on the client's update queue, so the next
/// attempt follows after the same delay.
pub fn spawn_reconnect(
    client: Arc<SyncClient>,
    config: LiveStreamConfig,
    delay: Duration,
    reconnected: mpsc::UnboundedSender<LiveEventStream>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let reason = match tokio::time::timeout(HANDSHAKE_TIMEOUT, client.connect_live(config)).await {
            Ok(Ok(stream)) => {
                info!("terminal: live connection restored");
                if let Err(mpsc::error::SendError(stream)) = reconnected.send(stream) {
                    stream.shutdown().await;
                }
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("handshake timed out after {HANDSHAKE_TIMEOUT:?}"),
        };
        warn!(error = %reason, "terminal: reconnect failed");
        let _ = client
            .updates()
            .send(CoreUpdate::Live(StreamEvent::Closed(CloseReason::ReadError(reason))));
    });
}

#[cfg(test)]
#[path = "tests/reconnect_tests.rs"]
mod tests;
