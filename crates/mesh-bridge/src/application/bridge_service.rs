//! Relay decisions for one client session.
//!
//! The WebSocket layer calls into [`BridgeService`] at exactly two points:
//!
//! ```text
//! new connection  ──► admit()               Ok: registered   Err: close 1013/1001
//! client message  ──► forward_from_client() Ok: written      Err: close 1011
//! ```
//!
//! Neither path does any socket I/O, which keeps the admission and
//! forwarding rules testable without a listener.

use std::sync::Arc;

use mesh_core::TransportFactory;
use tracing::{debug, error, warn};

use crate::application::client_registry::{ClientHandle, ClientId, ClientRegistry};
use crate::application::device_link::{DeviceLink, LinkError};
use crate::application::link_status::LinkStatus;
use crate::domain::{CloseReason, LinkConfig};

/// Glue between client sessions, the registry and the device link.
#[derive(Clone)]
pub struct BridgeService {
    link: Arc<DeviceLink>,
    registry: Arc<ClientRegistry>,
}

impl BridgeService {
    pub fn new(link: Arc<DeviceLink>, registry: Arc<ClientRegistry>) -> Self {
        Self { link, registry }
    }

    /// Wires a fresh link, link status and registry around `factory`.
    pub fn with_factory(config: LinkConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let status = LinkStatus::new();
        let registry = Arc::new(ClientRegistry::new(status.clone()));
        let link = DeviceLink::new(config, factory, status, Arc::clone(&registry));
        Self::new(link, registry)
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Registers a new client if the device is connected.
    ///
    /// # Errors
    ///
    /// - [`CloseReason::ServerShutdown`] once shutdown has started; the caller
    ///   closes the socket with 1001.
    /// - [`CloseReason::AdmissionRejected`] while the link is `Connecting` or
    ///   `Disconnected`; the caller closes the socket with 1013.
    pub fn admit(&self, client: ClientHandle) -> Result<ClientId, CloseReason> {
        let id = client.id();
        let peer = client.peer_addr();
        if self.registry.is_shutting_down() {
            debug!("rejecting client {peer}: shutting down");
            return Err(CloseReason::ServerShutdown);
        }
        if !self.link.is_connected() {
            warn!(
                "rejecting client {peer}: device {} is {}",
                self.link.device_path(),
                self.link.state()
            );
            return Err(CloseReason::AdmissionRejected);
        }
        if !self.registry.add(client) {
            // Shutdown or a disconnect raced the insert.
            if self.registry.is_shutting_down() {
                return Err(CloseReason::ServerShutdown);
            }
            warn!(
                "rejecting client {peer}: device {} is {}",
                self.link.device_path(),
                self.link.state()
            );
            return Err(CloseReason::AdmissionRejected);
        }
        debug!("client {id} from {peer} admitted");
        Ok(id)
    }

    /// Writes one client message to the radio.
    ///
    /// # Errors
    ///
    /// - [`CloseReason::DeviceNotReady`] if the link is not connected.  The
    ///   frame is not written and the link is left alone.
    /// - [`CloseReason::ForwardFailed`] if the transport write failed.
    pub async fn forward_from_client(&self, client: ClientId, frame: &[u8]) -> Result<(), CloseReason> {
        if !self.link.is_connected() {
            warn!(
                "dropping {} bytes from client {client}: device link {}",
                frame.len(),
                self.link.state()
            );
            return Err(CloseReason::DeviceNotReady);
        }

        match self.link.send_frame(frame).await {
            Ok(()) => Ok(()),
            Err(LinkError::NotConnected) => {
                warn!("device link went away before frame from client {client} was written");
                Err(CloseReason::DeviceNotReady)
            }
            Err(LinkError::Transport(e)) => {
                error!("failed to forward frame from client {client}: {e}");
                Err(CloseReason::ForwardFailed)
            }
        }
    }

    /// Forgets a client whose session ended.
    pub fn release(&self, client: ClientId) {
        self.registry.remove(client);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use mesh_core::transport::mock::MockTransportFactory;
    use mesh_core::TransportEvent;

    use super::*;
    use crate::domain::LinkState;

    fn peer() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    fn service(factory: Arc<MockTransportFactory>) -> BridgeService {
        let config = LinkConfig {
            device_path: "/dev/mock".to_string(),
            retry_delay: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(50),
            close_timeout: Duration::from_millis(200),
        };
        BridgeService::with_factory(config, factory)
    }

    async fn connected_service(factory: Arc<MockTransportFactory>) -> BridgeService {
        let svc = service(factory);
        svc.link().connect_with_retry().await;
        tokio::time::timeout(Duration::from_secs(2), svc.link().status().wait_for(LinkState::Connected))
            .await
            .unwrap();
        svc
    }

    #[tokio::test]
    async fn test_admit_rejects_before_device_connects() {
        // Arrange
        let svc = service(Arc::new(MockTransportFactory::new()));
        let (handle, _mailbox) = ClientHandle::new(peer(), 4);

        // Act
        let result = svc.admit(handle);

        // Assert
        assert_eq!(result, Err(CloseReason::AdmissionRejected));
        assert_eq!(CloseReason::AdmissionRejected.code(), 1013);
        assert!(svc.registry().is_empty());
    }

    #[tokio::test]
    async fn test_admit_rejects_while_awaiting_handshake() {
        let factory = Arc::new(MockTransportFactory::new().with_manual_handshake());
        let svc = service(factory);
        svc.link().connect_with_retry().await;
        let (handle, _mailbox) = ClientHandle::new(peer(), 4);

        assert_eq!(svc.admit(handle), Err(CloseReason::AdmissionRejected));
    }

    #[tokio::test]
    async fn test_admit_registers_client_when_connected() {
        let svc = connected_service(Arc::new(MockTransportFactory::new())).await;
        let (handle, _mailbox) = ClientHandle::new(peer(), 4);
        let expected = handle.id();

        let id = svc.admit(handle).unwrap();

        assert_eq!(id, expected);
        assert!(svc.registry().contains(id));
    }

    #[tokio::test]
    async fn test_admit_after_shutdown_started_closes_with_going_away() {
        // Arrange: link still connected, registry already shut down
        let svc = connected_service(Arc::new(MockTransportFactory::new())).await;
        svc.registry().shut_down();
        let (handle, _mailbox) = ClientHandle::new(peer(), 4);

        // Act
        let result = svc.admit(handle);

        // Assert
        assert_eq!(result, Err(CloseReason::ServerShutdown));
        assert!(svc.link().is_connected());
        assert!(svc.registry().is_empty());
    }

    #[tokio::test]
    async fn test_forward_writes_payload_to_device() {
        // Arrange
        let factory = Arc::new(MockTransportFactory::new());
        let svc = connected_service(factory.clone()).await;
        let (handle, _mailbox) = ClientHandle::new(peer(), 4);
        let id = svc.admit(handle).unwrap();

        // Act
        svc.forward_from_client(id, &[0x01, 0x03, 0x0A]).await.unwrap();

        // Assert
        assert_eq!(factory.latest().unwrap().sent_frames(), vec![vec![0x01, 0x03, 0x0A]]);
    }

    #[tokio::test]
    async fn test_forward_while_connecting_is_rejected_without_touching_link() {
        // Arrange: transport open, handshake pending
        let factory = Arc::new(MockTransportFactory::new().with_manual_handshake());
        let svc = service(factory.clone());
        svc.link().connect_with_retry().await;

        // Act
        let result = svc.forward_from_client(uuid::Uuid::new_v4(), &[0x01]).await;

        // Assert
        assert_eq!(result, Err(CloseReason::DeviceNotReady));
        assert_eq!(CloseReason::DeviceNotReady.code(), 1011);
        assert_eq!(svc.link().state(), LinkState::Connecting);
        assert!(factory.latest().unwrap().sent_frames().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_maps_to_forward_failed() {
        let factory = Arc::new(MockTransportFactory::new());
        let svc = connected_service(factory.clone()).await;
        factory.latest().unwrap().set_fail_send(true);

        let result = svc.forward_from_client(uuid::Uuid::new_v4(), &[0x02]).await;

        assert_eq!(result, Err(CloseReason::ForwardFailed));
        assert!(svc.link().is_connected());
    }

    #[tokio::test]
    async fn test_release_removes_client() {
        let svc = connected_service(Arc::new(MockTransportFactory::new())).await;
        let (handle, _mailbox) = ClientHandle::new(peer(), 4);
        let id = svc.admit(handle).unwrap();

        svc.release(id);
        svc.release(id);

        assert!(!svc.registry().contains(id));
    }

    #[tokio::test]
    async fn test_three_clients_receive_device_frames_until_one_leaves() {
        // Arrange
        let factory = Arc::new(MockTransportFactory::new());
        let svc = connected_service(factory.clone()).await;
        let mut mailboxes = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (handle, mailbox) = ClientHandle::new(peer(), 4);
            ids.push(svc.admit(handle).unwrap());
            mailboxes.push(mailbox);
        }
        let radio = factory.latest().unwrap();

        // Act 1: first frame reaches everyone
        radio.emit(TransportEvent::Rx(b"F1".to_vec()));
        for mailbox in &mut mailboxes {
            assert_eq!(mailbox.frames.recv().await, Some(b"F1".to_vec()));
        }

        // Act 2: the second client leaves, then a second frame
        svc.release(ids[1]);
        let _gone = mailboxes.remove(1);
        radio.emit(TransportEvent::Rx(b"F2".to_vec()));

        // Assert
        for mailbox in &mut mailboxes {
            assert_eq!(mailbox.frames.recv().await, Some(b"F2".to_vec()));
        }
        assert_eq!(svc.registry().len(), 2);
    }
}
