//! # podium-core
//!
//! Shared vocabulary for the Podium relay crates:
//!
//! - **Branded IDs**: [`ConnectionId`] as a newtype for type safety
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::ConnectionId;
