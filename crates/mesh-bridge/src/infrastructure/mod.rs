//! Infrastructure layer for mesh-bridge.
//!
//! Everything that touches a socket, a certificate file or a process signal
//! lives here.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and performing WebSocket upgrades
//! - Reading the optional TOML config file
//! - Choosing between WS and WSS at startup
//! - Running one task per client session
//! - Waiting for SIGINT/SIGTERM and tearing the bridge down in order
//!
//! Admission and forwarding rules are in the application layer; CLI/file
//! layering is done in `main.rs`.

pub mod config_file;
pub mod shutdown;
pub mod tls;
pub mod ws_server;

pub use ws_server::{run_server, BridgeServer};
