//! Serial-port transport for a USB-attached companion radio.
//!
//! The port is opened with `tokio-serial` and split into independent halves:
//! a background task owns the read half and turns raw bytes into
//! [`TransportEvent::Rx`] frames, while [`SerialTransport::send`] writes
//! framed payloads through the write half.
//!
//! # Streaming reads
//!
//! A single `read()` may return part of a frame or several frames at once.
//! Bytes are accumulated in a [`FrameDecoder`] which yields complete frames
//! only.  When the read returns EOF or fails (cable pulled, device reset) the
//! task emits [`TransportEvent::Disconnected`] and exits.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use super::{EventReceiver, RadioTransport, TransportError, TransportEvent, TransportFactory};
use crate::protocol::frame::{encode_to_radio, FrameDecoder};

/// Baud rate used by MeshCore companion firmware over USB serial.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// One connection to a radio on a serial device such as `/dev/ttyUSB0`.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// Creates an unopened transport that reports to `events`.
    pub fn new(
        path: impl Into<String>,
        baud_rate: u32,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            writer: Mutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    /// Device path this transport is bound to.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl RadioTransport for SerialTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let port = tokio_serial::new(self.path.as_str(), self.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::Open {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        let (read_half, write_half) = tokio::io::split(port);

        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::Release);

        let reader = tokio::spawn(read_frames(
            read_half,
            self.path.clone(),
            self.events.clone(),
            Arc::clone(&self.connected),
        ));
        if let Some(stale) = self.reader_task.lock().await.replace(reader) {
            stale.abort();
        }

        debug!("serial port {} open at {} baud", self.path, self.baud_rate);
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let bytes = encode_to_radio(frame)?;

        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }

        let _ = self.events.send(TransportEvent::Tx(frame.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);

        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

/// Reads serial bytes until EOF or error, emitting every decoded frame.
async fn read_frames(
    mut read_half: ReadHalf<SerialStream>,
    path: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut read_tmp = vec![0u8; 1024];

    loop {
        let n = match read_half.read(&mut read_tmp).await {
            Ok(0) => {
                debug!("serial port {path} reached EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("read from serial port {path} failed: {e}");
                break;
            }
        };

        for frame in decoder.push(&read_tmp[..n]) {
            if events.send(TransportEvent::Rx(frame)).is_err() {
                debug!("event receiver for {path} dropped; stopping reader");
                return;
            }
        }
    }

    connected.store(false, Ordering::Release);
    let _ = events.send(TransportEvent::Disconnected);
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Creates [`SerialTransport`]s at a fixed baud rate.
#[derive(Debug, Clone)]
pub struct SerialTransportFactory {
    baud_rate: u32,
}

impl SerialTransportFactory {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl TransportFactory for SerialTransportFactory {
    fn create(&self, device_path: &str) -> (Arc<dyn RadioTransport>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport: Arc<dyn RadioTransport> =
            Arc::new(SerialTransport::new(device_path, self.baud_rate, tx));
        (transport, rx)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_DEVICE: &str = "/dev/mesh-core-test-no-such-device";

    #[tokio::test]
    async fn test_connect_to_missing_device_returns_open_error() {
        // Arrange
        let (transport, mut events) = SerialTransportFactory::default().create(MISSING_DEVICE);

        // Act
        let result = transport.connect().await;

        // Assert: the error names the device and no Connected event is emitted
        match result {
            Err(TransportError::Open { path, .. }) => assert_eq!(path, MISSING_DEVICE),
            other => panic!("expected Open error, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let (transport, _events) = SerialTransportFactory::default().create(MISSING_DEVICE);
        let result = transport.send(&[1, 2, 3]).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_without_connect_succeeds_twice() {
        let (transport, _events) = SerialTransportFactory::default().create(MISSING_DEVICE);
        assert!(transport.close().await.is_ok());
        assert!(transport.close().await.is_ok());
    }

    #[test]
    fn test_factory_default_uses_companion_baud_rate() {
        assert_eq!(SerialTransportFactory::default().baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_transport_remembers_device_path() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = SerialTransport::new("/dev/ttyACM0", 9600, tx);
        assert_eq!(transport.path(), "/dev/ttyACM0");
    }
}
