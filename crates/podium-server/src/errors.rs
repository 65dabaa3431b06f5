//! Server error types.

use thiserror::Error;

/// Fatal errors raised while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` we tried to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The listener was bound but its address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Template loading and rendering failures.
#[derive(Debug, Error)]
pub enum PagesError {
    /// Template parsing or rendering failed.
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
    /// The templates directory path is not valid UTF-8.
    #[error("templates directory is not valid UTF-8: {0}")]
    InvalidPath(String),
    /// A required template is not present in the templates directory.
    #[error("missing template: {0}")]
    MissingTemplate(&'static str),
}

/// Why a message could not be enqueued for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient's outbound queue is full (slow consumer).
    #[error("outbound queue full ({total_drops} drops so far)")]
    Full {
        /// Lifetime drops for this recipient, including this one.
        total_drops: u64,
    },
    /// The recipient's queue is closed or the connection is shutting down.
    #[error("connection closed")]
    Closed,
}

/// An inbound frame that cannot be relayed.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Text frame that is not a single well-formed JSON value.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Binary frames are not part of the protocol.
    #[error("binary frame of {len} bytes not supported")]
    Binary {
        /// Payload length.
        len: usize,
    },
}
