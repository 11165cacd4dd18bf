//! mesh-bridge library crate.
//!
//! Relays binary frames between one MeshCore radio on a serial port and any
//! number of WebSocket clients.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! WebSocket clients (binary frames)
//!         ↕
//! [mesh-bridge]
//!   ├── domain/           LinkState, CloseReason, BridgeConfig
//!   ├── application/      DeviceLink, ClientRegistry, BridgeService
//!   └── infrastructure/
//!         ├── ws_server/  accept loop and client sessions (tokio-tungstenite)
//!         ├── tls/        optional WSS (tokio-rustls)
//!         └── shutdown/   signals and ordered teardown
//!         ↕
//! [mesh-core] RadioTransport → serial port → radio
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `mesh-core` only; it never
//!   touches a socket.
//! - `infrastructure` depends on everything else plus `tokio-tungstenite`
//!   and `tokio-rustls`.

/// Domain layer: plain types with no I/O.
pub mod domain;

/// Application layer: device link, client registry, relay rules.
pub mod application;

/// Infrastructure layer: WebSocket server, TLS, shutdown.
pub mod infrastructure;
