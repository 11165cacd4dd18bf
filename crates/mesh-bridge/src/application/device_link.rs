//! DeviceLink: owns the single connection to the radio.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► connect_with_retry() ──► transport.connect() ok ──► Connecting
//!                  ▲      │                                           │
//!                  │      └─ err: sleep retry_delay, new transport     │ Connected event
//!                  │                                                  ▼
//!   reconnect timer (reconnect_delay) ◄── Disconnected event ◄──── Connected
//! ```
//!
//! Device events arrive on an [`EventReceiver`] and are handled by one pump
//! task per transport.  Every transport gets a generation number; once a
//! newer transport is attached (or the link is closed) the old pump stops
//! and its late events are ignored.
//!
//! # Invariants
//!
//! - At most one connection attempt runs at a time.
//! - At most one reconnect timer is pending.
//! - After [`DeviceLink::close`] nothing reconnects.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mesh_core::{EventReceiver, RadioTransport, TransportError, TransportEvent, TransportFactory};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::application::client_registry::ClientRegistry;
use crate::application::link_status::LinkStatus;
use crate::domain::{CloseReason, LinkConfig, LinkState};

/// Errors returned by [`DeviceLink::send_frame`].
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device link is not connected")]
    NotConnected,

    #[error("device transport failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Default)]
struct LinkInner {
    transport: Option<Arc<dyn RadioTransport>>,
    /// Bumped whenever the current transport is replaced or released.
    generation: u64,
    connect_in_progress: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    closed: bool,
}

/// The bridge's single owner of the radio transport.
pub struct DeviceLink {
    config: LinkConfig,
    factory: Arc<dyn TransportFactory>,
    status: LinkStatus,
    registry: Arc<ClientRegistry>,
    inner: Mutex<LinkInner>,
}

impl DeviceLink {
    /// Creates an idle link.  Nothing is opened until [`start`](Self::start)
    /// or [`connect_with_retry`](Self::connect_with_retry) is called.
    pub fn new(
        config: LinkConfig,
        factory: Arc<dyn TransportFactory>,
        status: LinkStatus,
        registry: Arc<ClientRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            factory,
            status,
            registry,
            inner: Mutex::new(LinkInner::default()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LinkState {
        self.status.get()
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    pub fn device_path(&self) -> &str {
        &self.config.device_path
    }

    /// `true` while a reconnect timer is scheduled and has not fired.
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner()
            .reconnect_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Spawns the first connection attempt in the background.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let link = Arc::clone(self);
        tokio::spawn(async move { link.connect_with_retry().await })
    }

    // ── Connecting ────────────────────────────────────────────────────────────

    /// Opens the device, retrying every `retry_delay` until it succeeds or the
    /// link is closed.
    ///
    /// Returns once a transport is open; the link becomes `Connected` when the
    /// device's `Connected` event arrives.  Calling this while another attempt
    /// is running, or after [`close`](Self::close), does nothing.
    pub async fn connect_with_retry(self: &Arc<Self>) {
        {
            let mut inner = self.inner();
            if inner.closed {
                debug!("device link closed; not connecting");
                return;
            }
            if inner.connect_in_progress {
                debug!("connection attempt already in progress");
                return;
            }
            inner.connect_in_progress = true;
        }

        self.status.set(LinkState::Connecting);
        let path = self.config.device_path.as_str();

        loop {
            if self.inner().closed {
                debug!("device link closed during retry loop");
                break;
            }

            info!("opening device {path}");
            let (transport, events) = self.factory.create(path);
            match transport.connect().await {
                Ok(()) => {
                    if self.attach(Arc::clone(&transport), events) {
                        info!("device {path} open; waiting for handshake");
                    } else {
                        debug!("device link closed while opening {path}; releasing it");
                        if let Err(e) = transport.close().await {
                            warn!("failed to release device {path}: {e}");
                        }
                    }
                    break;
                }
                Err(e) => {
                    warn!(
                        "failed to open device {path}: {e}; retrying in {:?}",
                        self.config.retry_delay
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        self.inner().connect_in_progress = false;
    }

    /// Makes `transport` current and starts pumping its events.
    ///
    /// Returns `false` (and leaves the link untouched) if it was closed.
    fn attach(self: &Arc<Self>, transport: Arc<dyn RadioTransport>, events: EventReceiver) -> bool {
        let generation = {
            let mut inner = self.inner();
            if inner.closed {
                return false;
            }
            inner.generation += 1;
            inner.transport = Some(transport);
            inner.generation
        };
        self.spawn_event_pump(generation, events);
        true
    }

    fn spawn_event_pump(self: &Arc<Self>, generation: u64, mut events: EventReceiver) {
        let link = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !link.is_current(generation) {
                    debug!("ignoring events from superseded device transport");
                    break;
                }
                link.handle_event(event);
            }
            trace!("event pump for transport generation {generation} finished");
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner();
        !inner.closed && inner.generation == generation
    }

    // ── Device events ─────────────────────────────────────────────────────────

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        let path = self.config.device_path.as_str();
        match event {
            TransportEvent::Connected => {
                self.status.set(LinkState::Connected);
                info!("connected to device {path}");
            }
            TransportEvent::Disconnected => {
                self.inner().transport = None;
                self.status.set(LinkState::Disconnected);
                warn!("device {path} disconnected");
                let closed = self.registry.close_all(CloseReason::DeviceDisconnected);
                if closed > 0 {
                    info!("closed {closed} clients after device disconnect");
                }
                self.schedule_reconnect();
            }
            TransportEvent::Rx(frame) => {
                let delivered = self.registry.broadcast(&frame);
                debug!("rx {} bytes from device, delivered to {delivered} clients", frame.len());
            }
            TransportEvent::Tx(frame) => {
                debug!("tx {} bytes to device", frame.len());
            }
        }
    }

    /// Arms the reconnect timer unless one is already pending.
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut inner = self.inner();
        if inner.closed {
            return;
        }
        if inner
            .reconnect_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
        {
            debug!("reconnect already scheduled");
            return;
        }

        let delay = self.config.reconnect_delay;
        info!("reconnecting to device in {delay:?}");
        let link = Arc::clone(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            link.connect_with_retry().await;
        }));
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Writes one client payload to the radio.
    ///
    /// Fails with [`LinkError::NotConnected`] unless the link is `Connected`.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let transport = self.inner().transport.clone();
        let Some(transport) = transport else {
            return Err(LinkError::NotConnected);
        };
        transport.send(frame).await?;
        Ok(())
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Cancels any pending reconnect and closes the transport.
    ///
    /// Idempotent.  Closing the device is bounded by `close_timeout`; a
    /// timeout or close error is logged, never returned.
    pub async fn close(&self) {
        let (transport, timer) = {
            let mut inner = self.inner();
            inner.closed = true;
            inner.generation += 1;
            (inner.transport.take(), inner.reconnect_timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
            debug!("cancelled pending reconnect");
        }
        self.status.set(LinkState::Disconnected);

        let Some(transport) = transport else {
            debug!("no open device to close");
            return;
        };

        let path = self.config.device_path.as_str();
        match tokio::time::timeout(self.config.close_timeout, transport.close()).await {
            Ok(Ok(())) => info!("device {path} closed"),
            Ok(Err(e)) => error!("error closing device {path}: {e}"),
            Err(_) => warn!(
                "timed out closing device {path} after {:?}",
                self.config.close_timeout
            ),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
