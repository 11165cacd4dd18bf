//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from CLI arguments, environment variables and
//! an optional TOML file (see `main.rs`), or from [`BridgeConfig::default`]
//! in tests.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the domain) lets tests construct a bridge with millisecond
//! retry delays and an ephemeral port.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Listen port used when none is configured.
pub const DEFAULT_PORT: u16 = 8787;

/// Baud rate used by MeshCore companion firmware.
pub const DEFAULT_BAUD_RATE: u32 = mesh_core::transport::serial::DEFAULT_BAUD_RATE;

/// Delay between failed device open attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Delay between a device disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Serial device path typical for the current platform.
pub fn default_device_path() -> &'static str {
    #[cfg(target_os = "windows")]
    return "COM3";
    #[cfg(target_os = "macos")]
    return "/dev/tty.usbserial";
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    return "/dev/ttyUSB0";
}

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use mesh_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8787);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Serial device the radio is attached to.
    pub device_path: String,

    /// Serial line speed.
    pub baud_rate: u32,

    /// Address and port the WebSocket listener binds to.
    ///
    /// `0.0.0.0` accepts connections from any interface.
    pub ws_bind_addr: SocketAddr,

    /// PEM private key.  WSS is served only when this and
    /// [`tls_cert_path`](Self::tls_cert_path) both exist.
    pub tls_key_path: PathBuf,

    /// PEM certificate chain.
    pub tls_cert_path: PathBuf,

    /// Wait between failed attempts to open the device.
    pub retry_delay: Duration,

    /// Wait after a device disconnect before reconnecting.
    pub reconnect_delay: Duration,

    /// Upper bound on how long shutdown waits for the device to close.
    pub device_close_timeout: Duration,

    /// How long shutdown lets sessions flush their close frames.
    pub shutdown_grace: Duration,

    /// Outbound frames buffered per client before new frames are dropped.
    pub client_queue_depth: usize,
}

impl Default for BridgeConfig {
    /// | Field                | Default         |
    /// |----------------------|-----------------|
    /// | device_path          | `/dev/ttyUSB0`  |
    /// | baud_rate            | 115200          |
    /// | ws_bind_addr         | `0.0.0.0:8787`  |
    /// | tls_key_path         | `cert.key`      |
    /// | tls_cert_path        | `cert.crt`      |
    /// | retry_delay          | 3 s             |
    /// | reconnect_delay      | 2 s             |
    /// | device_close_timeout | 2 s             |
    /// | shutdown_grace       | 1 s             |
    /// | client_queue_depth   | 64              |
    fn default() -> Self {
        Self {
            device_path: default_device_path().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            tls_key_path: PathBuf::from("cert.key"),
            tls_cert_path: PathBuf::from("cert.crt"),
            retry_delay: DEFAULT_RETRY_DELAY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            device_close_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(1),
            client_queue_depth: 64,
        }
    }
}

/// The subset of [`BridgeConfig`] the device link needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub device_path: String,
    pub retry_delay: Duration,
    pub reconnect_delay: Duration,
    pub close_timeout: Duration,
}

impl From<&BridgeConfig> for LinkConfig {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            device_path: cfg.device_path.clone(),
            retry_delay: cfg.retry_delay,
            reconnect_delay: cfg.reconnect_delay,
            close_timeout: cfg.device_close_timeout,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
