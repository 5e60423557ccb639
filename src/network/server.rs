//! WebSocket Game Server
//!
//! Accepts WebSocket connections, authenticates the first message, then
//! bridges the socket to a [`ServerContext`] session: text frames are JSON
//! control messages, binary frames are gameplay packets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::context::ServerContext;
use crate::core::{env_millis, env_parse};
use crate::network::auth::{authenticate, AuthConfig, AuthenticatedUser};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::Outbound;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// Time allowed for the auth message.
    pub auth_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 256,
            auth_timeout: Duration::from_secs(10),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BIND_ADDR`, `MAX_CONNECTIONS`,
    /// `OUTBOUND_BUFFER` and `AUTH_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bind_addr: env_parse("BIND_ADDR").unwrap_or(d.bind_addr),
            max_connections: env_parse("MAX_CONNECTIONS").unwrap_or(d.max_connections),
            outbound_buffer: env_parse("OUTBOUND_BUFFER").unwrap_or(d.outbound_buffer),
            auth_timeout: env_millis("AUTH_TIMEOUT_MS").unwrap_or(d.auth_timeout),
            version: d.version,
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

type WsReader = SplitStream<WebSocketStream<TcpStream>>;

/// Decrements the live connection count when a connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    auth: AuthConfig,
    ctx: Arc<ServerContext>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, auth: AuthConfig, ctx: Arc<ServerContext>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            auth,
            ctx,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Shutdown channel shared with background tasks.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(err) = self.admit(stream, addr) {
                                warn!("Rejecting {}: {}", addr, err);
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), GameServerError> {
        let live = self.connections.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard(Arc::clone(&self.connections));
        if live >= self.config.max_connections {
            return Err(GameServerError::ConnectionLimitReached);
        }
        debug!("New connection from {}", addr);
        self.handle_connection(stream, addr, guard);
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, guard: ConnectionGuard) {
        let ctx = Arc::clone(&self.ctx);
        let auth = self.auth.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            let user = match handshake(&mut ws_receiver, &auth, config.auth_timeout).await {
                Ok(user) => user,
                Err((code, message)) => {
                    debug!("Client {} failed auth: {}", addr, message);
                    if let Ok(text) = ServerMessage::error(code, message).to_json() {
                        let _ = ws_sender.send(Message::Text(text)).await;
                    }
                    let _ = ws_sender.close().await;
                    return;
                }
            };

            let (tx, mut rx) = mpsc::channel::<Outbound>(config.outbound_buffer);
            let session_id = ctx.connect(&user.userid, &user.username, false, tx).await;
            ctx.directory().send_to_session(
                &session_id,
                ServerMessage::ConnectionSuccessful {
                    session_id: session_id.clone(),
                    userid: user.userid.clone(),
                    username: user.username.clone(),
                    server_version: config.version.clone(),
                },
            );

            let writer = tokio::spawn(async move {
                while let Some(outbound) = rx.recv().await {
                    let message = match outbound {
                        Outbound::Json(msg) => match msg.to_json() {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                error!("Failed to serialize message: {}", e);
                                continue;
                            }
                        },
                        Outbound::Binary(data) => Message::Binary(data),
                    };
                    if ws_sender.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => ctx.handle_message(&session_id, client_msg).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        ctx.directory().send_to_session(
                                            &session_id,
                                            ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"),
                                        );
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                ctx.handle_binary(&session_id, &data).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/pong is answered by the library
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            ctx.disconnect(&session_id).await;
            // The directory dropped its sender, so the writer drains and exits
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("Writer for {} did not finish in time", addr);
            }
            info!("Client {} ({}) cleaned up", addr, user.userid);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Wait for the auth message and resolve the user behind it.
async fn handshake(
    ws_receiver: &mut WsReader,
    auth: &AuthConfig,
    timeout: Duration,
) -> Result<AuthenticatedUser, (ErrorCode, String)> {
    let first = tokio::time::timeout(timeout, async {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                _ => return None,
            }
        }
    })
    .await
    .map_err(|_| (ErrorCode::NotAuthenticated, "Auth timed out".to_string()))?
    .ok_or_else(|| (ErrorCode::NotAuthenticated, "Expected auth message".to_string()))?;

    match ClientMessage::from_json(&first) {
        Ok(ClientMessage::Auth(request)) => {
            authenticate(&request.token, auth).map_err(|e| (e.code(), e.to_string()))
        }
        _ => Err((ErrorCode::NotAuthenticated, "Must authenticate first".to_string())),
    }
}
