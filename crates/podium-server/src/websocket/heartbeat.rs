//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Number of silent intervals tolerated before a connection is dead.
///
/// `timeout / interval`, clamped to at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let missed = (timeout.as_millis() / interval_ms).max(1);
    u32::try_from(missed).unwrap_or(u32::MAX)
}

/// Watch a connection for liveness.
///
/// One `interval` after start, and at every tick after that, the alive flag
/// is checked and reset. Any inbound frame or pong sets it again. After
/// [`max_missed`] consecutive silent ticks the connection is considered dead
/// and `HeartbeatResult::TimedOut` is returned. Pings are sent by the writer
/// task on the same period, so the pong to each ping is counted at the
/// following tick.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;
    // Skip the immediate tick; the connection starts alive.
    let _ = check_interval.tick().await;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
