//! WebSocket client connection handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use podium_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::errors::DeliveryError;

/// Lifecycle of one connection.
///
/// `Connecting → Active → Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade completed, not yet registered.
    Connecting,
    /// Registered and receiving.
    Active,
    /// Removed from the registry; no further reads or writes.
    Closed,
}

/// Represents a connected WebSocket client.
///
/// The receive loop owns the socket's read half; the relay holds an `Arc`
/// of this handle and only ever enqueues onto the outbound queue.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Lifecycle state.
    state: Mutex<ConnectionState>,
    /// Cancelled when the connection closes, for any reason.
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection in the `Connecting` state.
    ///
    /// `cancel` is normally a child of the server shutdown token.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            state: Mutex::new(ConnectionState::Connecting),
            cancel,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// `Connecting → Active`. Returns `false` if the connection was not connecting.
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Active;
            true
        } else {
            false
        }
    }

    /// Move to `Closed` and cancel the connection token.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&self) -> bool {
        let was_open = {
            let mut state = self.state.lock();
            let was_open = *state != ConnectionState::Closed;
            *state = ConnectionState::Closed;
            was_open
        };
        self.cancel.cancel();
        was_open
    }

    /// Whether the connection reached `Closed`.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Token cancelled when this connection closes.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Enqueue a text message for the client's writer task.
    ///
    /// Never blocks. A full queue counts a drop; a closed queue or closed
    /// connection is reported as [`DeliveryError::Closed`].
    pub fn send(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let total_drops = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                Err(DeliveryError::Full { total_drops })
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}
