//! Per-connection receive loop and writer task.
//!
//! Each upgraded socket is split in two. The read half is driven by
//! [`read_loop`] on the connection's own task, which validates every text
//! frame and hands it to the relay before reading the next one, so
//! messages from one sender are relayed in the order they arrived. The write
//! half is owned by a spawned [`write_loop`] that drains the outbound queue
//! and sends keepalive pings.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, histogram};
use podium_core::ConnectionId;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::message::RelayMessage;
use super::relay::BroadcastRelay;
use crate::config::ServerConfig;
use crate::errors::FrameError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_MALFORMED_FRAMES_TOTAL, WS_MESSAGES_RECEIVED_TOTAL,
};

/// Why a receive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The stream ended without a close frame.
    StreamEnded,
    /// The transport reported an error.
    ReadError,
    /// The client sent a frame that is not a single JSON value.
    MalformedFrame,
    /// The connection was closed from elsewhere (relay removal, heartbeat, writer failure).
    Cancelled,
    /// The server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::ReadError => "read_error",
            Self::MalformedFrame => "malformed_frame",
            Self::Cancelled => "cancelled",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a writer task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The connection token was cancelled.
    Cancelled,
    /// Every queue sender was dropped.
    QueueClosed,
    /// Writing to the socket failed.
    SendFailed,
}

/// Serve one upgraded socket until it closes.
///
/// Registers the connection, runs the receive loop on this task and tears
/// everything down on exit: the connection is removed from the registry
/// and closed, which stops the writer and heartbeat tasks. The capacity
/// `permit` is released only after both tasks have finished.
#[instrument(skip_all, fields(conn_id = tracing::field::Empty))]
pub async fn handle_connection(
    socket: WebSocket,
    relay: Arc<BroadcastRelay>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    let (tx, rx) = mpsc::channel(config.send_queue_capacity.max(1));
    let conn = Arc::new(ClientConnection::new(
        ConnectionId::new(),
        tx,
        shutdown.child_token(),
    ));
    let _ = tracing::Span::current().record("conn_id", conn.id.as_str());

    let registry = Arc::clone(relay.registry());
    let _ = registry.add(Arc::clone(&conn)).await;
    let _ = conn.activate();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(connections = registry.connection_count(), "client connected");

    let (sink, mut stream) = socket.split();

    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        config.heartbeat_interval(),
        conn.token().clone(),
    ));

    let heartbeat = {
        let conn = Arc::clone(&conn);
        let interval = config.heartbeat_interval();
        let timeout = config.heartbeat_timeout();
        tokio::spawn(async move {
            let cancel = conn.token().clone();
            let result = run_heartbeat(Arc::clone(&conn), interval, timeout, cancel).await;
            if result == HeartbeatResult::TimedOut {
                warn!(conn_id = %conn.id, "heartbeat timed out");
                let _ = conn.close();
            }
            result
        })
    };

    let reason = read_loop(&mut stream, &conn, &relay, &shutdown).await;

    let _ = registry.remove(&conn.id).await;
    let _ = conn.close();
    if let Err(e) = writer.await {
        warn!(error = %e, "writer task failed");
    }
    if let Err(e) = heartbeat.await {
        warn!(error = %e, "heartbeat task failed");
    }

    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
    info!(
        %reason,
        dropped = conn.drop_count(),
        connections = registry.connection_count(),
        "client disconnected"
    );
    drop(permit);
}

/// Receive frames until the connection ends, relaying each JSON message.
///
/// Cancellation of the connection token takes priority over a pending frame,
/// so nothing is relayed once the connection is closed.
pub async fn read_loop<S, E>(
    stream: &mut S,
    conn: &ClientConnection,
    relay: &BroadcastRelay,
    shutdown: &CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = conn.token().cancelled() => {
                return if shutdown.is_cancelled() {
                    CloseReason::ServerShutdown
                } else {
                    CloseReason::Cancelled
                };
            }
            frame = stream.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(conn_id = %conn.id, error = %e, "websocket read failed");
                return CloseReason::ReadError;
            }
            None => return CloseReason::StreamEnded,
        };
        conn.mark_alive();

        match msg {
            WsMessage::Text(text) => match RelayMessage::parse(text.as_str()) {
                Ok(message) => {
                    counter!(WS_MESSAGES_RECEIVED_TOTAL).increment(1);
                    let report = relay.broadcast(Some(&conn.id), &message).await;
                    debug!(
                        conn_id = %conn.id,
                        bytes = message.len(),
                        delivered = report.delivered,
                        "message relayed"
                    );
                }
                Err(e) => return malformed(conn, &e),
            },
            WsMessage::Binary(data) => {
                return malformed(conn, &FrameError::Binary { len: data.len() });
            }
            // axum answers pings itself
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            WsMessage::Close(_) => return CloseReason::ClientClosed,
        }
    }
}

fn malformed(conn: &ClientConnection, error: &FrameError) -> CloseReason {
    counter!(WS_MALFORMED_FRAMES_TOTAL).increment(1);
    warn!(conn_id = %conn.id, error = %error, "closing connection after malformed frame");
    CloseReason::MalformedFrame
}

/// Drain the outbound queue into the socket, with periodic pings.
///
/// On cancellation a close frame is sent. A failed write cancels the
/// connection token so the receive loop stops too.
pub async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Arc<String>>,
    ping_every: Duration,
    cancel: CancellationToken,
) -> WriterExit
where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let mut ping_interval = time::interval(ping_every);
    // consume first immediate tick
    let _ = ping_interval.tick().await;

    loop {
        let outgoing = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return WriterExit::Cancelled;
            }
            msg = rx.recv() => match msg {
                Some(text) => WsMessage::Text(Arc::unwrap_or_clone(text).into()),
                None => return WriterExit::QueueClosed,
            },
            _ = ping_interval.tick() => WsMessage::Ping(Bytes::new()),
        };

        if let Err(e) = sink.send(outgoing).await {
            debug!(error = %e, "websocket write failed");
            cancel.cancel();
            return WriterExit::SendFailed;
        }
    }
}
