//! In-memory radio transport for testing the bridge without hardware.
//!
//! # Why a mock transport?
//!
//! The real [`SerialTransport`](super::SerialTransport) needs a radio plugged
//! into a serial port.  The `MockTransport` instead records every frame sent
//! to it and lets the test inject device events (`Connected`, `Rx`,
//! `Disconnected`) by hand, in exactly the order the test wants.
//!
//! # Usage in tests
//!
//! ```ignore
//! let factory = Arc::new(MockTransportFactory::new());
//! let link = DeviceLink::new(config, factory.clone(), status, registry);
//!
//! link.connect_with_retry().await;
//! let radio = factory.latest().unwrap();
//! radio.emit(TransportEvent::Rx(vec![1, 2, 3]));
//! ```
//!
//! The factory records every instance it creates, so tests can also assert
//! how many connection attempts were made.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EventReceiver, RadioTransport, TransportError, TransportEvent, TransportFactory};
use crate::protocol::frame::Frame;

/// A transport that records calls and replays injected events.
pub struct MockTransport {
    path: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: AtomicBool,
    fail_connect: bool,
    connect_delay: Duration,
    auto_handshake: bool,
    fail_send: AtomicBool,
    /// Every frame passed to `send`, in order.
    sent: Mutex<Vec<Frame>>,
    close_calls: AtomicUsize,
}

impl MockTransport {
    /// Injects a device event as if the hardware produced it.
    ///
    /// Returns `false` once the bridge has dropped the event receiver.
    pub fn emit(&self, event: TransportEvent) -> bool {
        if event == TransportEvent::Disconnected {
            self.connected.store(false, Ordering::Release);
        }
        self.events.send(event).is_ok()
    }

    /// Makes every subsequent `send` fail with an I/O error.
    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::Release);
    }

    /// Frames written through `send` so far.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(TransportError::Open {
                path: self.path.clone(),
                reason: "mock failure".into(),
            });
        }
        self.connected.store(true, Ordering::Release);
        if self.auto_handshake {
            let _ = self.events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::Acquire) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock failure",
            )));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(frame.to_vec());
        let _ = self.events.send(TransportEvent::Tx(frame.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

/// Factory that hands out [`MockTransport`]s and remembers each one.
pub struct MockTransportFactory {
    failures_remaining: AtomicUsize,
    connect_delay: Duration,
    auto_handshake: bool,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    /// Transports connect immediately and emit `Connected` on success.
    pub fn new() -> Self {
        Self {
            failures_remaining: AtomicUsize::new(0),
            connect_delay: Duration::ZERO,
            auto_handshake: true,
            created: Mutex::new(Vec::new()),
        }
    }

    /// The first `count` transports created will fail to connect.
    pub fn with_connect_failures(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::Release);
        self
    }

    /// Every `connect` call sleeps for `delay` first.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Successful connects do not emit `Connected`; the test must do it.
    pub fn with_manual_handshake(mut self) -> Self {
        self.auto_handshake = false;
        self
    }

    /// Number of transport instances created so far.
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// The most recently created transport.
    pub fn latest(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    /// The `index`-th transport created (0-based).
    pub fn transport(&self, index: usize) -> Option<Arc<MockTransport>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).get(index).cloned()
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, device_path: &str) -> (Arc<dyn RadioTransport>, EventReceiver) {
        let fail_connect = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            path: device_path.to_string(),
            events: tx,
            connected: AtomicBool::new(false),
            fail_connect,
            connect_delay: self.connect_delay,
            auto_handshake: self.auto_handshake,
            fail_send: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        });
        self.created.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::clone(&transport));
        (transport as Arc<dyn RadioTransport>, rx)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
