//! WebSocket server: accept loop and per-client sessions.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Optionally wrapping each connection in TLS (see [`super::tls`]).
//! 3. Upgrading each connection to a WebSocket session.
//! 4. Admitting or rejecting the client through [`BridgeService::admit`].
//! 5. Relaying frames in both directions until either side closes.
//!
//! # Sessions
//!
//! Each session is a single task that owns its socket and waits on three
//! sources at once:
//!
//! ```text
//!   close request (registry) ──┐
//!   outbound frames (queue)  ──┼──► select! ──► WebSocket
//!   inbound messages (socket)──┘
//! ```
//!
//! Close requests win over queued frames so a disconnect or shutdown is
//! written promptly.  Sessions live in a `JoinSet` owned by the accept loop
//! and handed to the shutdown coordinator when the loop stops.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{Sink, SinkExt, StreamExt};
use mesh_core::TransportFactory;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::client_registry::{ClientHandle, ClientId, ClientMailbox};
use crate::application::BridgeService;
use crate::domain::{BridgeConfig, CloseReason, LinkConfig};
use crate::infrastructure::{shutdown, tls};

/// How often the accept loop wakes up to check the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the bridge until `running` is set to `false`, then shuts it down.
///
/// Loads TLS material, binds the listener, starts the device link and serves
/// clients.  On shutdown the listener is dropped, every client is closed with
/// 1001 and the device link is closed.
///
/// # Errors
///
/// Returns an error if the TLS files exist but cannot be loaded, or if the
/// listener cannot be bound.  Nothing after startup is fatal.
pub async fn run_server(
    config: BridgeConfig,
    factory: Arc<dyn TransportFactory>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let acceptor = tls::load_acceptor(&config.tls_key_path, &config.tls_cert_path)
        .context("failed to load TLS certificate")?;

    let service = BridgeService::with_factory(LinkConfig::from(&config), factory);
    let server = BridgeServer::bind(&config, service.clone(), acceptor).await?;

    service.link().start();
    let sessions = server.run(running).await;

    shutdown::teardown(&service, sessions, config.shutdown_grace).await;
    Ok(())
}

/// A bound listener ready to serve clients.
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    service: BridgeService,
    queue_depth: usize,
}

impl BridgeServer {
    /// Binds `config.ws_bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or cannot be bound.
    pub async fn bind(
        config: &BridgeConfig,
        service: BridgeService,
        acceptor: Option<TlsAcceptor>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.ws_bind_addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {}", config.ws_bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read listener address")?;

        let scheme = if acceptor.is_some() { "wss" } else { "ws" };
        info!("bridge listening on {scheme}://{local_addr}");

        Ok(Self {
            listener,
            local_addr,
            acceptor,
            service,
            queue_depth: config.client_queue_depth,
        })
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `running` is cleared.
    ///
    /// The listener is closed when this returns; the still-running sessions
    /// are handed back to the caller.
    pub async fn run(self, running: Arc<AtomicBool>) -> JoinSet<()> {
        let mut sessions = JoinSet::new();

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            while let Some(finished) = sessions.try_join_next() {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("session task panicked: {e}");
                    }
                }
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new connection from {peer_addr}");
                    sessions.spawn(handle_connection(
                        stream,
                        peer_addr,
                        self.acceptor.clone(),
                        self.service.clone(),
                        self.queue_depth,
                    ));
                }
                Ok(Err(e)) => {
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // No connection within the poll window.
                }
            }
        }

        drop(self.listener);
        debug!("listener on {} closed", self.local_addr);
        sessions
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    service: BridgeService,
    queue_depth: usize,
) {
    let outcome = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => run_session(tls_stream, peer_addr, service, queue_depth).await,
            Err(e) => {
                warn!("TLS handshake with {peer_addr} failed: {e}");
                return;
            }
        },
        None => run_session(stream, peer_addr, service, queue_depth).await,
    };

    if let Err(e) = outcome {
        warn!("session {peer_addr} ended with error: {e:#}");
    }
}

/// Runs one WebSocket session from upgrade to close.
///
/// Generic over the byte stream so the same code serves WS, WSS and
/// in-memory test streams.
pub(crate) async fn run_session<S>(
    stream: S,
    peer_addr: SocketAddr,
    service: BridgeService,
    queue_depth: usize,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (handle, mailbox) = ClientHandle::new(peer_addr, queue_depth);
    let client_id = match service.admit(handle) {
        Ok(id) => id,
        Err(reason) => {
            send_close(&mut ws, reason).await;
            return Ok(());
        }
    };
    info!("client {client_id} connected from {peer_addr}");

    let (ws_tx, ws_rx) = ws.split();
    let result = relay(ws_tx, ws_rx, client_id, mailbox, &service).await;

    service.release(client_id);
    match &result {
        Ok(peer_close) => info!(
            "client {client_id} disconnected: {}",
            describe_close(peer_close.as_ref())
        ),
        Err(_) => info!("client {client_id} disconnected"),
    }
    result.map(|_| ())
}

/// Relays until either side closes.  Returns the client's Close frame, if
/// the client was the one that closed.
async fn relay<Tx, Rx>(
    mut ws_tx: Tx,
    mut ws_rx: Rx,
    client_id: ClientId,
    mut mailbox: ClientMailbox,
    service: &BridgeService,
) -> anyhow::Result<Option<CloseFrame<'static>>>
where
    Tx: Sink<WsMessage, Error = WsError> + Unpin,
    Rx: futures_util::Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            request = &mut mailbox.close => {
                match request {
                    Ok(reason) => {
                        debug!("closing client {client_id}: {}", reason.reason());
                        send_close(&mut ws_tx, reason).await;
                    }
                    Err(_) => debug!("client {client_id} dropped by registry"),
                }
                return Ok(None);
            }

            Some(frame) = mailbox.frames.recv() => {
                ws_tx
                    .send(WsMessage::Binary(frame))
                    .await
                    .with_context(|| format!("failed to write frame to client {client_id}"))?;
            }

            incoming = ws_rx.next() => {
                let payload = match incoming {
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        let _ = ws_tx.close().await;
                        return Ok(frame.map(CloseFrame::into_owned));
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                        debug!("client {client_id} stream ended");
                        return Ok(None);
                    }
                    Some(Err(e)) => {
                        warn!("client {client_id} socket error: {e}");
                        return Ok(None);
                    }
                };

                if let Err(reason) = service.forward_from_client(client_id, &payload).await {
                    send_close(&mut ws_tx, reason).await;
                    return Ok(None);
                }
            }
        }
    }
}

fn describe_close(frame: Option<&CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) => format!("code {} ({})", u16::from(frame.code), frame.reason),
        None => "no close code".to_string(),
    }
}

/// Writes a Close frame carrying `reason`'s code and text.
async fn send_close<S>(sink: &mut S, reason: CloseReason)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(reason.code()),
        reason: reason.reason().into(),
    };
    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
        debug!("failed to send close {}: {e}", reason.code());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
