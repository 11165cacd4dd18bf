//! Domain layer for mesh-bridge.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or async runtimes.  This makes them easy to test in isolation.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - The device link readiness state
//! - The close reasons the bridge reports to WebSocket clients
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, serial port, or WebSocket types
//! - File I/O or environment variable reading

pub mod close;
pub mod config;
pub mod link_state;

pub use close::CloseReason;
pub use config::{BridgeConfig, LinkConfig};
pub use link_state::LinkState;
