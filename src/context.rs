//! Server context.
//!
//! Owns every long-lived component and routes client messages to them. The
//! WebSocket server and in-process bots both talk to the server through
//! this one entry point, so a bot session is indistinguishable from a
//! browser session once it is registered.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::matchmaking::{AbortCounter, MatchmakingConfig, QueueError, RankedQueue};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{Outbound, SessionDirectory, SessionId};
use crate::room::{PuzzleSource, RoomConfig, RoomError, RoomRegistry, RoomServices, SessionRef};
use crate::user::{UserAttribute, UserEvent, UserRecord, UserStore};

/// Shared server state.
pub struct ServerContext {
    services: Arc<RoomServices>,
    registry: Arc<RoomRegistry>,
    queue: Arc<RankedQueue>,
}

impl ServerContext {
    /// Wire up rooms and matchmaking around the given collaborators.
    pub fn new(
        users: Arc<dyn UserStore>,
        puzzles: Arc<dyn PuzzleSource>,
        room_config: RoomConfig,
        matchmaking: MatchmakingConfig,
    ) -> Self {
        let directory = Arc::new(SessionDirectory::new());
        let aborts = Arc::new(AbortCounter::new(&matchmaking, Arc::clone(&directory)));
        let services = Arc::new(RoomServices {
            directory,
            users,
            aborts,
            puzzles,
            config: room_config,
        });
        let registry = Arc::new(RoomRegistry::new(Arc::clone(&services)));
        let queue = Arc::new(RankedQueue::new(matchmaking, Arc::clone(&registry)));
        Self {
            services,
            registry,
            queue,
        }
    }

    /// Shared room collaborators.
    pub fn services(&self) -> &Arc<RoomServices> {
        &self.services
    }

    /// Session directory.
    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.services.directory
    }

    /// User store.
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.services.users
    }

    /// Room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Ranked queue.
    pub fn queue(&self) -> &Arc<RankedQueue> {
        &self.queue
    }

    /// Start the matchmaking loop.
    pub fn spawn_matchmaking(&self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.queue).run(shutdown))
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Register an authenticated connection. Creates the user record on
    /// first sight.
    pub async fn connect(
        &self,
        userid: &str,
        username: &str,
        is_bot: bool,
        sender: mpsc::Sender<Outbound>,
    ) -> SessionId {
        let users = &self.services.users;
        users
            .get_or_create(UserRecord::new(userid, username, is_bot))
            .await;
        if let Err(err) = users.alter(userid, UserEvent::Online).await {
            warn!(userid = %userid, error = %err, "Failed to mark user online");
        }
        let session_id = self.services.directory.register(userid, username, sender);
        info!(userid = %userid, session_id = %session_id, is_bot, "Session connected");
        session_id
    }

    /// Connection closed: leave the queue and any room, then forget the session.
    pub async fn disconnect(&self, session_id: &str) {
        let directory = &self.services.directory;
        let Some(userid) = directory.userid_of(session_id) else {
            return;
        };
        self.queue.on_session_disconnect(&userid, session_id).await;
        self.registry.on_session_disconnect(session_id).await;
        directory.remove(session_id);
        info!(userid = %userid, session_id = %session_id, "Session disconnected");
    }

    /// Binary gameplay frame from a session.
    pub async fn handle_binary(&self, session_id: &str, frame: &[u8]) {
        self.registry.on_binary(session_id, frame).await;
    }

    /// Handle one control message. Failures are reported back to the session
    /// as an ERROR message.
    pub async fn handle_message(&self, session_id: &str, msg: ClientMessage) {
        if let Err(err) = self.dispatch(session_id, msg).await {
            debug!(session_id = %session_id, error = %err, "Client message rejected");
            self.services
                .directory
                .send_to_session(session_id, ServerMessage::error(err.code(), err.to_string()));
        }
    }

    async fn dispatch(&self, session_id: &str, msg: ClientMessage) -> Result<(), DispatchError> {
        let directory = &self.services.directory;
        let userid = directory
            .userid_of(session_id)
            .ok_or_else(|| DispatchError::SessionNotFound(session_id.to_string()))?;
        let session = SessionRef::new(&userid, session_id);

        match msg {
            ClientMessage::Auth(_) => Err(DispatchError::AlreadyAuthenticated),
            ClientMessage::JoinRankedQueue { queue_type } => {
                self.queue.join(queue_type, session_id).await?;
                Ok(())
            }
            ClientMessage::LeaveRankedQueue => {
                self.queue.leave(&userid).await;
                Ok(())
            }
            ClientMessage::CreateSoloRoom => {
                self.leave_queue_if_waiting(&userid).await;
                self.registry.create_solo_room(&session).await?;
                Ok(())
            }
            ClientMessage::CreatePuzzleRush => {
                self.leave_queue_if_waiting(&userid).await;
                self.registry.create_puzzle_rush(&session).await?;
                Ok(())
            }
            ClientMessage::SpectateRoom { room_id } => {
                self.registry.spectate_room(&room_id, &session).await?;
                Ok(())
            }
            ClientMessage::SpectateUser { userid: target } => {
                self.registry.spectate_user(&target, &session).await?;
                Ok(())
            }
            ClientMessage::LeaveRoom => {
                self.registry.leave_room(session_id).await?;
                Ok(())
            }
            ClientMessage::ClientRoomEvent { event } => {
                self.registry.on_client_event(&session, event).await?;
                Ok(())
            }
            ClientMessage::Chat { message } => {
                let username = directory.username_of(session_id).unwrap_or_else(|| userid.clone());
                self.registry.chat(session_id, &username, &message).await?;
                Ok(())
            }
            ClientMessage::SetAllowBotOpponents { allow } => {
                self.services
                    .users
                    .alter(&userid, UserEvent::UpdateAttribute(UserAttribute::AllowBotOpponents(allow)))
                    .await
                    .map_err(RoomError::from)?;
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                directory.send_to_session(
                    session_id,
                    ServerMessage::Pong {
                        timestamp,
                        server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                    },
                );
                Ok(())
            }
        }
    }

    async fn leave_queue_if_waiting(&self, userid: &str) {
        if self.queue.contains(userid) {
            self.queue.leave(userid).await;
        }
    }

    /// Stop everything: destroy rooms and tell every session.
    pub async fn shutdown(&self, reason: &str) {
        self.registry.shutdown().await;
        self.services.directory.send_to_all(ServerMessage::Shutdown {
            reason: reason.to_string(),
        });
    }
}

/// Why a control message was rejected.
#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Already authenticated")]
    AlreadyAuthenticated,

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Room(#[from] RoomError),
}

impl DispatchError {
    fn code(&self) -> ErrorCode {
        match self {
            DispatchError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            DispatchError::AlreadyAuthenticated => ErrorCode::InvalidInput,
            DispatchError::Queue(err) => err.code(),
            DispatchError::Room(err) => err.code(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-process clients for context-level tests.

    use super::*;
    use crate::room::GeneratedPuzzleSource;
    use crate::user::InMemoryUserStore;

    pub fn create_test_context(matchmaking: MatchmakingConfig) -> Arc<ServerContext> {
        Arc::new(ServerContext::new(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(GeneratedPuzzleSource::new(10)),
            RoomConfig::default(),
            matchmaking,
        ))
    }

    pub fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Json(msg) = item {
                out.push(msg);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::network::protocol::{ClientRoomEvent, InRoomStatus, QueueType};
    use crate::network::session::ActivityType;
    use crate::room::RoomType;

    #[tokio::test]
    async fn test_connect_creates_record() {
        let ctx = create_test_context(MatchmakingConfig::default());
        let (tx, _rx) = mpsc::channel(16);
        let session_id = ctx.connect("alice", "Alice", false, tx).await;

        assert_eq!(ctx.directory().userid_of(&session_id).as_deref(), Some("alice"));
        let record = ctx.users().get("alice").await.unwrap();
        assert_eq!(record.username, "Alice");
        assert!(!record.is_bot);
    }

    #[tokio::test]
    async fn test_solo_room_via_dispatch() {
        let ctx = create_test_context(MatchmakingConfig::default());
        let (tx, mut rx) = mpsc::channel(64);
        let session_id = ctx.connect("alice", "Alice", false, tx).await;

        ctx.handle_message(&session_id, ClientMessage::CreateSoloRoom).await;
        let status = drain(&mut rx).into_iter().find_map(|m| match m {
            ServerMessage::InRoomStatus { status, room_info, .. } => Some((status, room_info)),
            _ => None,
        });
        let (status, info) = status.unwrap();
        assert_eq!(status, InRoomStatus::Player);
        assert_eq!(info.unwrap().room_type, RoomType::Solo);
        assert_eq!(
            ctx.directory().activity("alice").map(|a| a.kind),
            Some(ActivityType::Solo)
        );

        ctx.handle_message(&session_id, ClientMessage::LeaveRoom).await;
        assert!(ctx.directory().activity("alice").is_none());
        assert_eq!(ctx.registry().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_errors_reported_to_session() {
        let ctx = create_test_context(MatchmakingConfig::default());
        let (tx, mut rx) = mpsc::channel(64);
        let session_id = ctx.connect("alice", "Alice", false, tx).await;

        ctx.handle_message(
            &session_id,
            ClientMessage::ClientRoomEvent { event: ClientRoomEvent::Ready },
        )
        .await;
        ctx.handle_message(&session_id, ClientMessage::JoinRankedQueue { queue_type: QueueType::Ranked })
            .await;

        let codes: Vec<ErrorCode> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Error(err) => Some(err.code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![ErrorCode::NotInRoom, ErrorCode::RankedLocked]);
    }

    #[tokio::test]
    async fn test_allow_bot_opponents_toggle() {
        let ctx = create_test_context(MatchmakingConfig::default());
        let (tx, _rx) = mpsc::channel(16);
        let session_id = ctx.connect("alice", "Alice", false, tx).await;

        ctx.handle_message(&session_id, ClientMessage::SetAllowBotOpponents { allow: false })
            .await;
        assert!(!ctx.users().get("alice").await.unwrap().allow_bot_opponents);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_queue_and_room() {
        let ctx = create_test_context(MatchmakingConfig::default());
        let (tx, _rx) = mpsc::channel(64);
        let session_id = ctx.connect("alice", "Alice", false, tx).await;
        ctx.handle_message(&session_id, ClientMessage::CreateSoloRoom).await;
        assert_eq!(ctx.registry().room_count().await, 1);

        ctx.disconnect(&session_id).await;
        assert_eq!(ctx.registry().room_count().await, 0);
        assert!(!ctx.directory().is_online(&session_id));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let ctx = create_test_context(MatchmakingConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let session_id = ctx.connect("alice", "Alice", false, tx).await;

        ctx.handle_message(&session_id, ClientMessage::Ping { timestamp: 42 }).await;
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::Pong { timestamp: 42, .. })));
    }
}
