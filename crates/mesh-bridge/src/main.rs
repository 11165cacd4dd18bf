//! MeshCore WebSocket bridge: entry point.
//!
//! Opens a MeshCore companion radio on a local serial port and relays its
//! binary frames to every connected WebSocket client.  Frames sent by any
//! client are written to the radio.
//!
//! # Usage
//!
//! ```text
//! mesh-bridge [OPTIONS]
//!
//! Options:
//!   --device <PATH>           Serial device [default: /dev/ttyUSB0]
//!   --baud-rate <BAUD>        Serial line speed [default: 115200]
//!   --host <IP>               Listen address [default: 0.0.0.0]
//!   --port <PORT>             Listen port [default: 8787]
//!   --tls-key <PATH>          PEM private key [default: cert.key]
//!   --tls-cert <PATH>         PEM certificate chain [default: cert.crt]
//!   --retry-delay-ms <MS>     Wait between failed opens [default: 3000]
//!   --reconnect-delay-ms <MS> Wait after a disconnect [default: 2000]
//!   --client-queue-depth <N>  Frames buffered per client [default: 64]
//!   --config <FILE>           Optional TOML config file
//! ```
//!
//! # Environment variables
//!
//! | Variable                      | Flag                   |
//! |-------------------------------|------------------------|
//! | `MESHCORE_SERIAL_PORT`        | `--device`             |
//! | `MESHCORE_BAUD_RATE`          | `--baud-rate`          |
//! | `MESHCORE_BRIDGE_HOST`        | `--host`               |
//! | `MESHCORE_BRIDGE_PORT`        | `--port`               |
//! | `MESHCORE_TLS_KEY`            | `--tls-key`            |
//! | `MESHCORE_TLS_CERT`           | `--tls-cert`           |
//! | `MESHCORE_RETRY_DELAY_MS`     | `--retry-delay-ms`     |
//! | `MESHCORE_RECONNECT_DELAY_MS` | `--reconnect-delay-ms` |
//! | `MESHCORE_CLIENT_QUEUE_DEPTH` | `--client-queue-depth` |
//! | `MESHCORE_BRIDGE_CONFIG`      | `--config`             |
//!
//! Precedence: command line or environment, then the config file, then the
//! built-in defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mesh_bridge::domain::config::DEFAULT_PORT;
use mesh_bridge::domain::BridgeConfig;
use mesh_bridge::infrastructure::config_file::FileConfig;
use mesh_bridge::infrastructure::{run_server, shutdown};
use mesh_core::SerialTransportFactory;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// MeshCore WebSocket bridge.
///
/// Every option is optional so that values from `--config` can fill the gaps.
#[derive(Debug, Default, Parser)]
#[command(
    name = "mesh-bridge",
    about = "Share a serial MeshCore radio with WebSocket clients",
    version
)]
struct Cli {
    /// Serial device the radio is attached to.
    #[arg(long, env = "MESHCORE_SERIAL_PORT")]
    device: Option<String>,

    /// Serial line speed.
    #[arg(long, env = "MESHCORE_BAUD_RATE")]
    baud_rate: Option<u32>,

    /// IP address to listen on.  `0.0.0.0` accepts connections on every
    /// interface.
    #[arg(long, env = "MESHCORE_BRIDGE_HOST")]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "MESHCORE_BRIDGE_PORT")]
    port: Option<u16>,

    /// PEM private key; WSS is served when this and `--tls-cert` exist.
    #[arg(long, env = "MESHCORE_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// PEM certificate chain.
    #[arg(long, env = "MESHCORE_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// Milliseconds between failed attempts to open the device.
    #[arg(long, env = "MESHCORE_RETRY_DELAY_MS")]
    retry_delay_ms: Option<u64>,

    /// Milliseconds to wait after a disconnect before reconnecting.
    #[arg(long, env = "MESHCORE_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,

    /// Outbound frames buffered per client before frames are dropped.
    #[arg(long, env = "MESHCORE_CLIENT_QUEUE_DEPTH")]
    client_queue_depth: Option<usize>,

    /// Optional TOML config file.
    #[arg(long, env = "MESHCORE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Loads `--config` (if given) and layers the CLI values on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the host is not a valid IP address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };
        self.merge(file)
    }

    /// CLI/env values win over `file`, which wins over the defaults.
    fn merge(self, file: FileConfig) -> anyhow::Result<BridgeConfig> {
        let defaults = BridgeConfig::default();

        let host = self
            .host
            .or(file.host)
            .unwrap_or_else(|| defaults.ws_bind_addr.ip().to_string());
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("invalid listen host: '{host}'"))?;
        let port = self.port.or(file.port).unwrap_or(DEFAULT_PORT);

        let millis = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map(Duration::from_millis).unwrap_or(default)
        };

        Ok(BridgeConfig {
            device_path: self.device.or(file.device_path).unwrap_or(defaults.device_path),
            baud_rate: self.baud_rate.or(file.baud_rate).unwrap_or(defaults.baud_rate),
            ws_bind_addr: SocketAddr::new(ip, port),
            tls_key_path: self.tls_key.or(file.tls_key).unwrap_or(defaults.tls_key_path),
            tls_cert_path: self.tls_cert.or(file.tls_cert).unwrap_or(defaults.tls_cert_path),
            retry_delay: millis(self.retry_delay_ms, file.retry_delay_ms, defaults.retry_delay),
            reconnect_delay: millis(
                self.reconnect_delay_ms,
                file.reconnect_delay_ms,
                defaults.reconnect_delay,
            ),
            client_queue_depth: self
                .client_queue_depth
                .or(file.client_queue_depth)
                .unwrap_or(defaults.client_queue_depth),
            ..defaults
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// The bridge is I/O bound with a single device, so it runs on the
/// current-thread runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity; default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    info!(
        "MeshCore bridge starting: device={} @ {} baud, listen={}",
        config.device_path, config.baud_rate, config.ws_bind_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    shutdown::spawn_signal_listener(Arc::clone(&running));

    let factory = Arc::new(SerialTransportFactory::new(config.baud_rate));
    run_server(config, factory, running).await?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_cli_without_arguments_leaves_everything_unset() {
        let cli = Cli::parse_from(["mesh-bridge"]);
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["mesh-bridge", "--port", "9999"]);
        assert_eq!(cli.port, Some(9999));
    }

    #[test]
    fn test_cli_device_override() {
        let cli = Cli::parse_from(["mesh-bridge", "--device", "/dev/ttyACM0"]);
        assert_eq!(cli.device.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_defaults_produce_default_bridge_config() {
        // Arrange
        let cli = Cli::default();

        // Act
        let config = cli.merge(FileConfig::default()).unwrap();

        // Assert
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.ws_bind_addr.to_string(), "0.0.0.0:8787");
    }

    #[test]
    fn test_file_values_fill_unset_cli_values() {
        let file = FileConfig {
            device_path: Some("/dev/ttyACM1".to_string()),
            port: Some(9100),
            retry_delay_ms: Some(100),
            ..FileConfig::default()
        };

        let config = Cli::default().merge(file).unwrap();

        assert_eq!(config.device_path, "/dev/ttyACM1");
        assert_eq!(config.ws_bind_addr.port(), 9100);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.reconnect_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_cli_values_win_over_file() {
        // Arrange: both set the port and host
        let cli = Cli {
            host: Some("127.0.0.1".to_string()),
            port: Some(8000),
            ..Cli::default()
        };
        let file = FileConfig {
            host: Some("10.0.0.1".to_string()),
            port: Some(9000),
            baud_rate: Some(57_600),
            ..FileConfig::default()
        };

        // Act
        let config = cli.merge(file).unwrap();

        // Assert
        assert_eq!(config.ws_bind_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(config.baud_rate, 57_600);
    }

    #[test]
    fn test_invalid_host_returns_error() {
        let cli = Cli {
            host: Some("not.an.ip".to_string()),
            ..Cli::default()
        };
        assert!(cli.merge(FileConfig::default()).is_err());
    }

    #[test]
    fn test_ipv6_host_is_accepted() {
        let cli = Cli {
            host: Some("::1".to_string()),
            port: Some(8787),
            ..Cli::default()
        };
        let config = cli.merge(FileConfig::default()).unwrap();
        assert_eq!(config.ws_bind_addr.to_string(), "[::1]:8787");
    }

    #[test]
    fn test_into_bridge_config_reads_config_file() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 9443\ntls_key = \"/etc/bridge/key.pem\"").unwrap();
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.ws_bind_addr.port(), 9443);
        assert_eq!(config.tls_key_path, PathBuf::from("/etc/bridge/key.pem"));
    }

    #[test]
    fn test_into_bridge_config_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config: Some(dir.path().join("missing.toml")),
            ..Cli::default()
        };
        assert!(cli.into_bridge_config().is_err());
    }
}
