//! # podium-server
//!
//! Axum HTTP + `WebSocket` relay for the presenter/audience pattern.
//!
//! - `WebSocket` gateway: per-connection receive loop, heartbeat, writer task
//! - Connection registry with point-in-time snapshots
//! - Broadcast relay: fan-out of every inbound JSON frame to all connections
//! - Presentation routes: rendered presenter/audience pages, static assets
//! - Health and Prometheus endpoints
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod pages;
pub mod server;
pub mod shutdown;
pub mod websocket;
