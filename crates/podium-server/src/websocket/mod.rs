//! WebSocket connection management, heartbeat, and broadcasting.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-client handle: outbound queue, lifecycle state, liveness |
//! | `registry` | Set of live connections, snapshots for fan-out |
//! | `relay` | Broadcast of one inbound message to every registered connection |
//! | `message` | Opaque JSON payload validated at the transport boundary |
//! | `handler` | Per-connection receive loop and writer task |
//! | `heartbeat` | Periodic liveness checks |
//!
//! ## Data Flow
//!
//! `handler` (read frame) → `message` (validate) → `relay` → `registry`
//! snapshot → each `connection` queue → writer task → socket.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod message;
pub mod registry;
pub mod relay;
