//! Signal handling and ordered teardown.
//!
//! Shutdown runs in this order, each step best-effort:
//!
//! 1. A signal clears the shared `running` flag; the accept loop notices
//!    within one poll interval and drops the listener.
//! 2. [`teardown`] stops admitting clients and closes every registered one
//!    with 1001.  A handshake that completes after this point is answered
//!    with 1001 as well.
//! 3. Sessions get `grace` to write their Close frames; stragglers are aborted.
//! 4. The device link is closed (bounded by its own close timeout).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::BridgeService;

/// Waits for SIGINT (Ctrl+C) or, on Unix, SIGTERM.  Returns the signal name.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}

/// Spawns a task that clears `running` when a shutdown signal arrives.
pub fn spawn_signal_listener(running: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!("received {name}; shutting down");
                running.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                error!("failed to listen for shutdown signals: {e}");
            }
        }
    })
}

/// Closes all clients, drains sessions and closes the device link.
///
/// Never fails; problems are logged.
pub async fn teardown(service: &BridgeService, mut sessions: JoinSet<()>, grace: Duration) {
    let closed = service.registry().shut_down();
    info!("closing {closed} clients");

    let drained = tokio::time::timeout(grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} sessions still open after {grace:?}; aborting them",
            sessions.len()
        );
        sessions.shutdown().await;
    } else {
        debug!("all sessions finished");
    }

    service.link().close().await;
    info!("bridge stopped");
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use mesh_core::transport::mock::MockTransportFactory;
    use tokio_tungstenite::client_async;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::application::client_registry::ClientHandle;
    use crate::domain::{CloseReason, LinkConfig, LinkState};
    use crate::infrastructure::ws_server::run_session;

    fn service(factory: Arc<MockTransportFactory>) -> BridgeService {
        let config = LinkConfig {
            device_path: "/dev/mock".to_string(),
            retry_delay: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(50),
            close_timeout: Duration::from_millis(200),
        };
        BridgeService::with_factory(config, factory)
    }

    #[tokio::test]
    async fn test_teardown_closes_clients_with_1001_and_device() {
        // Arrange: connected link with one client
        let factory = Arc::new(MockTransportFactory::new());
        let svc = service(factory.clone());
        svc.link().connect_with_retry().await;
        svc.link().status().wait_for(LinkState::Connected).await;
        let (handle, mailbox) = ClientHandle::new("127.0.0.1:1".parse().unwrap(), 4);
        svc.admit(handle).unwrap();

        // Act
        teardown(&svc, JoinSet::new(), Duration::from_millis(100)).await;

        // Assert
        assert_eq!(mailbox.close.await.unwrap(), CloseReason::ServerShutdown);
        assert!(svc.registry().is_empty());
        assert_eq!(factory.latest().unwrap().close_calls(), 1);
        assert_eq!(svc.link().state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_finishing_during_teardown_gets_1001() {
        // Arrange: a session accepted before shutdown, upgrade not yet done
        let factory = Arc::new(MockTransportFactory::new());
        let svc = service(factory.clone());
        svc.link().connect_with_retry().await;
        svc.link().status().wait_for(LinkState::Connected).await;
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut sessions = JoinSet::new();
        let session_svc = svc.clone();
        sessions.spawn(async move {
            let _ = run_session(server_io, "127.0.0.1:2".parse().unwrap(), session_svc, 4).await;
        });

        // Act: teardown starts, then the client finishes its handshake
        let teardown_svc = svc.clone();
        let teardown = tokio::spawn(async move {
            teardown(&teardown_svc, sessions, Duration::from_secs(1)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (mut ws, _response) = client_async("ws://localhost/", client_io).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap();

        // Assert
        match message {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason, "Server shutting down");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(svc.registry().is_empty());
        tokio::time::timeout(Duration::from_secs(2), teardown).await.unwrap().unwrap();
        assert_eq!(factory.latest().unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_teardown_aborts_sessions_that_outlive_grace() {
        // Arrange: a session that never finishes on its own
        let svc = service(Arc::new(MockTransportFactory::new()));
        let mut sessions = JoinSet::new();
        sessions.spawn(std::future::pending::<()>());

        // Act
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            teardown(&svc, sessions, Duration::from_millis(50)),
        )
        .await;

        // Assert
        assert!(result.is_ok(), "teardown must not wait on a stuck session");
    }

    #[tokio::test]
    async fn test_teardown_without_device_is_harmless() {
        let factory = Arc::new(MockTransportFactory::new());
        let svc = service(factory.clone());

        teardown(&svc, JoinSet::new(), Duration::from_millis(10)).await;

        assert_eq!(factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_listener_leaves_flag_set_without_signal() {
        let running = Arc::new(AtomicBool::new(true));

        let listener = spawn_signal_listener(Arc::clone(&running));
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.abort();

        assert!(running.load(Ordering::Relaxed));
    }
}
