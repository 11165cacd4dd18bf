//! Optional TOML configuration file.
//!
//! Every key is optional; anything left out falls back to the CLI/environment
//! value or the built-in default (see `main.rs` for the precedence).
//!
//! ```toml
//! device_path = "/dev/ttyACM0"
//! baud_rate = 115200
//! host = "127.0.0.1"
//! port = 8787
//! tls_key = "/etc/mesh-bridge/cert.key"
//! tls_cert = "/etc/mesh-bridge/cert.crt"
//! retry_delay_ms = 3000
//! reconnect_delay_ms = 2000
//! client_queue_depth = 64
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings read from the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub device_path: Option<String>,
    pub baud_rate: Option<u32>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_key: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub retry_delay_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub client_queue_depth: Option<usize>,
}

impl FileConfig {
    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not valid TOML or contains unknown keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}
