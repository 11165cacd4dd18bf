//! Device transport contract.
//!
//! A [`RadioTransport`] is one connection attempt to the radio.  The bridge
//! creates a fresh instance through a [`TransportFactory`] for every attempt,
//! so an instance never has to support reconnecting.
//!
//! # Events
//!
//! Each instance reports what happens on the wire through an ordered,
//! unbounded event channel handed out by the factory together with the
//! instance.  Events produced before the receiver is polled are buffered, so
//! the consumer can start listening after `connect()` returns without losing
//! the `Connected` event.
//!
//! ```text
//! factory.create(path) ──► (transport, events)
//!                              │          │
//!                       connect/send   Connected, Rx, Tx, Disconnected
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::frame::{Frame, FrameError};

pub mod mock;
pub mod serial;

pub use serial::{SerialTransport, SerialTransportFactory};

/// Something the transport observed on the device link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The device is open and ready to exchange frames.
    Connected,
    /// The device went away (unplugged, read error, EOF).
    Disconnected,
    /// A frame arrived from the radio.
    Rx(Frame),
    /// A frame was written to the radio.
    Tx(Frame),
}

/// Receiving end of a transport's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Errors reported by a [`RadioTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be opened.
    #[error("failed to open device {path}: {reason}")]
    Open { path: String, reason: String },

    /// An operation that needs an open device was called without one.
    #[error("device is not connected")]
    NotConnected,

    /// The frame could not be encoded for the wire.
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),

    /// An I/O error occurred on the open device.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single connection to the mesh radio.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Opens the device.  Completion does not imply the handshake finished;
    /// that is signalled by [`TransportEvent::Connected`].
    async fn connect(&self) -> Result<(), TransportError>;

    /// Writes one frame to the radio.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if the device is not open.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Releases the device.  Closing an already closed transport succeeds.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds transport instances bound to a device path.
pub trait TransportFactory: Send + Sync {
    /// Creates a new, unconnected transport and its event stream.
    fn create(&self, device_path: &str) -> (Arc<dyn RadioTransport>, EventReceiver);
}
