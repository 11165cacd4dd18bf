//! Readiness of the device link.

use std::fmt;

/// Where the single device connection currently stands.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected
///      ▲              │  ▲            │
///      │              └──┘ retry      │
///      └──────────────────────────────┘ device disconnected
/// ```
///
/// Only `Connected` admits WebSocket clients and forwards their frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No device connection and no attempt running.
    #[default]
    Disconnected,
    /// The retry loop is opening the device or waiting for its handshake.
    Connecting,
    /// The device completed its handshake and exchanges frames.
    Connected,
}

impl LinkState {
    /// `true` only for [`LinkState::Connected`].
    pub fn is_ready(self) -> bool {
        self == LinkState::Connected
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(name)
    }
}
