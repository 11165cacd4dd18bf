//! Shared, observable [`LinkState`].
//!
//! The device link is the only writer.  The client registry and the bridge
//! service read it to gate admission and forwarding, and tests subscribe to
//! it to wait for transitions instead of sleeping.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::LinkState;

/// Cloneable handle to the process-wide link state.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    tx: Arc<watch::Sender<LinkState>>,
}

impl LinkStatus {
    /// Starts in [`LinkState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.get().is_ready()
    }

    /// Publishes `state` and returns the previous one.
    pub(crate) fn set(&self, state: LinkState) -> LinkState {
        self.tx.send_replace(state)
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }

    /// Resolves once the link reaches `state` (immediately if it already has).
    pub async fn wait_for(&self, state: LinkState) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|current| *current == state).await;
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}
