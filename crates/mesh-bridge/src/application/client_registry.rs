//! ClientRegistry: the set of attached WebSocket clients.
//!
//! The registry never touches a socket.  Each client is represented by a
//! [`ClientHandle`] holding two channels into its session task:
//!
//! - a bounded frame queue, filled by [`ClientRegistry::broadcast`];
//! - a one-shot close request, used by [`ClientRegistry::close_all`] and
//!   [`ClientRegistry::shut_down`].
//!
//! The session task owns the WebSocket and drains both (see
//! `infrastructure::ws_server`).
//!
//! # Delivery semantics
//!
//! Frames are best-effort.  A client whose queue is full misses the frame and
//! a client that is closing is skipped; neither affects delivery to the rest.
//!
//! # Locking
//!
//! The map sits behind a `std::sync::Mutex` that is only held for insert,
//! remove, snapshot and drain.  No lock is held while frames are queued, so a
//! client that joins or leaves during a broadcast never blocks it.
//!
//! The shutdown gate is flipped while that same lock is held, so a client is
//! either drained by [`ClientRegistry::shut_down`] or refused by
//! [`ClientRegistry::add`], never left registered after it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mesh_core::Frame;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::application::link_status::LinkStatus;
use crate::domain::CloseReason;

/// Identity of one attached client.
pub type ClientId = Uuid;

// ── Client handle ─────────────────────────────────────────────────────────────

/// The registry's reference to one client session.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    peer_addr: SocketAddr,
    frames: mpsc::Sender<Frame>,
    close: oneshot::Sender<CloseReason>,
}

/// The session task's end of a [`ClientHandle`].
#[derive(Debug)]
pub struct ClientMailbox {
    /// Frames to write to the socket, in broadcast order.
    pub frames: mpsc::Receiver<Frame>,
    /// Fires once if the server wants this client closed.
    pub close: oneshot::Receiver<CloseReason>,
}

/// Outcome of queueing a frame for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    Full,
    Closed,
}

impl ClientHandle {
    /// Creates a handle with a fresh identity and an outbound queue of
    /// `queue_depth` frames (at least one).
    pub fn new(peer_addr: SocketAddr, queue_depth: usize) -> (Self, ClientMailbox) {
        let (frames_tx, frames_rx) = mpsc::channel(queue_depth.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let handle = Self {
            id: Uuid::new_v4(),
            peer_addr,
            frames: frames_tx,
            close: close_tx,
        };
        let mailbox = ClientMailbox {
            frames: frames_rx,
            close: close_rx,
        };
        (handle, mailbox)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// `false` once the session task has stopped reading its mailbox.
    pub fn is_open(&self) -> bool {
        !self.frames.is_closed() && !self.close.is_closed()
    }

    /// Asks the session to close with `reason`.
    ///
    /// Returns `false` if the session had already ended.
    pub fn close(self, reason: CloseReason) -> bool {
        self.close.send(reason).is_ok()
    }
}

fn deliver(frames: &mpsc::Sender<Frame>, frame: &[u8]) -> Delivery {
    match frames.try_send(frame.to_vec()) {
        Ok(()) => Delivery::Queued,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Tracks every admitted client.  Clients are keyed by [`ClientId`], so the
/// same session can never be registered twice.
#[derive(Debug)]
pub struct ClientRegistry {
    status: LinkStatus,
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    shutting_down: AtomicBool,
}

impl ClientRegistry {
    pub fn new(status: LinkStatus) -> Self {
        Self {
            status,
            clients: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientHandle>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `client`.
    ///
    /// Does nothing and returns `false` unless the device link is connected,
    /// or once [`shut_down`](Self::shut_down) has run.
    pub fn add(&self, client: ClientHandle) -> bool {
        let mut clients = self.clients();
        if self.shutting_down.load(Ordering::Relaxed) {
            debug!(
                "not registering client {} from {}: shutting down",
                client.id, client.peer_addr
            );
            return false;
        }
        if !self.status.is_connected() {
            debug!(
                "not registering client {} from {}: device link {}",
                client.id,
                client.peer_addr,
                self.status.get()
            );
            return false;
        }
        clients.insert(client.id, client);
        true
    }

    /// `true` once [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Forgets a client.  Unknown ids are ignored.
    pub fn remove(&self, id: ClientId) {
        if self.clients().remove(&id).is_some() {
            trace!("client {id} removed from registry");
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    /// Queues `frame` for every open client and returns how many accepted it.
    ///
    /// Empty frames and an empty registry are no-ops.  Membership is
    /// snapshotted first; clients that are closing or whose queue is full are
    /// skipped.
    pub fn broadcast(&self, frame: &[u8]) -> usize {
        if frame.is_empty() {
            return 0;
        }

        let targets: Vec<(ClientId, mpsc::Sender<Frame>)> = {
            let clients = self.clients();
            if clients.is_empty() {
                return 0;
            }
            clients
                .values()
                .filter(|c| c.is_open())
                .map(|c| (c.id, c.frames.clone()))
                .collect()
        };

        debug!(
            "broadcasting {} byte frame to {} clients",
            frame.len(),
            targets.len()
        );

        let mut queued = 0;
        for (id, frames) in &targets {
            match deliver(frames, frame) {
                Delivery::Queued => queued += 1,
                Delivery::Full => debug!("client {id} outbound queue full; frame dropped"),
                Delivery::Closed => trace!("client {id} closed mid-broadcast; skipped"),
            }
        }
        queued
    }

    /// Closes every client with `reason` and empties the registry.
    ///
    /// Clients are removed before they are asked to close.  Returns how many
    /// sessions accepted the close request; the registry is empty afterwards
    /// either way.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<ClientHandle> = self.clients().drain().map(|(_, c)| c).collect();
        close_drained(drained, reason)
    }

    /// Stops admitting clients, then closes every registered one with
    /// [`CloseReason::ServerShutdown`].
    ///
    /// Any later [`add`](Self::add) is refused.  Returns how many sessions
    /// accepted the close request.
    pub fn shut_down(&self) -> usize {
        let drained: Vec<ClientHandle> = {
            let mut clients = self.clients();
            self.shutting_down.store(true, Ordering::Relaxed);
            clients.drain().map(|(_, c)| c).collect()
        };
        close_drained(drained, CloseReason::ServerShutdown)
    }
}

fn close_drained(drained: Vec<ClientHandle>, reason: CloseReason) -> usize {
    let mut closed = 0;
    for client in drained {
        let id = client.id;
        if client.close(reason) {
            closed += 1;
        } else {
            debug!("client {id} already gone; close request not delivered");
        }
    }
    if closed > 0 {
        debug!(
            "closed {closed} clients with {} ({})",
            reason.code(),
            reason.reason()
        );
    }
    closed
}

// ── Tests ─────────────────────────────────────────────────────────────────────
