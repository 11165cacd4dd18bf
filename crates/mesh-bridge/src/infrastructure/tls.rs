//! Startup-time choice between WS and WSS.
//!
//! WSS is served only when both the private key and the certificate chain
//! exist on disk.  If either is missing the bridge serves plain WebSocket.
//! Files that exist but do not contain usable PEM data are a startup error.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, crypto::ring, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no PEM certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no PEM private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// `true` when both files exist.
pub fn tls_files_present(key_path: &Path, cert_path: &Path) -> bool {
    key_path.is_file() && cert_path.is_file()
}

/// Builds a TLS acceptor from PEM files, or returns `None` when either file
/// is absent.
pub fn load_acceptor(key_path: &Path, cert_path: &Path) -> Result<Option<TlsAcceptor>, TlsError> {
    if !tls_files_present(key_path, cert_path) {
        debug!(
            "TLS files {} / {} not both present; serving plain WebSocket",
            key_path.display(),
            cert_path.display()
        );
        return Ok(None);
    }

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    info!("loaded TLS certificate {}", cert_path.display());
    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_missing_files_select_plain_websocket() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_acceptor(&dir.path().join("cert.key"), &dir.path().join("cert.crt"));
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_key_without_cert_selects_plain_websocket() {
        // Arrange: only the key exists
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("cert.key");
        fs::copy(fixture("test.key"), &key).unwrap();

        // Act
        let result = load_acceptor(&key, &dir.path().join("cert.crt"));

        // Assert
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_cert_without_key_selects_plain_websocket() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.crt");
        fs::copy(fixture("test.crt"), &cert).unwrap();

        assert!(!tls_files_present(&dir.path().join("cert.key"), &cert));
        assert!(load_acceptor(&dir.path().join("cert.key"), &cert).unwrap().is_none());
    }

    #[test]
    fn test_valid_pem_pair_builds_acceptor() {
        let result = load_acceptor(&fixture("test.key"), &fixture("test.crt"));
        assert!(result.unwrap().is_some());
    }

    #[test]
    fn test_garbage_certificate_is_an_error() {
        // Arrange: both files exist, the cert has no PEM blocks
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("cert.key");
        let cert = dir.path().join("cert.crt");
        fs::copy(fixture("test.key"), &key).unwrap();
        fs::write(&cert, "not a certificate\n").unwrap();

        // Act
        let result = load_acceptor(&key, &cert);

        // Assert
        assert!(matches!(result, Err(TlsError::NoCertificates(_))));
    }

    #[test]
    fn test_garbage_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("cert.key");
        let cert = dir.path().join("cert.crt");
        fs::write(&key, "still not a key\n").unwrap();
        fs::copy(fixture("test.crt"), &cert).unwrap();

        let result = load_acceptor(&key, &cert);

        assert!(matches!(result, Err(TlsError::NoPrivateKey(_))));
    }
}
