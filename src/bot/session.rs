//! In-process bot session.
//!
//! A bot registers with the [`ServerContext`] like any connection and gets
//! an outbound channel. A listener task folds the pushed IN_ROOM_STATUS and
//! ROOM_STATE_UPDATE messages into a [`RoomView`] that the bot watches, and
//! forwards relayed binary frames to the bot's game loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::context::ServerContext;
use crate::network::protocol::{ClientMessage, ClientRoomEvent, InRoomStatus, ServerMessage};
use crate::network::session::{Outbound, SessionId};
use crate::room::state::MultiplayerRoomState;
use crate::room::{RoomInfo, RoomState};

const OUTBOUND_BUFFER: usize = 256;

/// What the bot currently knows about its room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    /// Relation to the room.
    pub status: InRoomStatus,
    /// Room summary.
    pub room_info: Option<RoomInfo>,
    /// Latest room state.
    pub room_state: Option<RoomState>,
}

impl Default for RoomView {
    fn default() -> Self {
        Self {
            status: InRoomStatus::None,
            room_info: None,
            room_state: None,
        }
    }
}

impl RoomView {
    /// Multiplayer state, if the room is a multiplayer room.
    pub fn multiplayer(&self) -> Option<&MultiplayerRoomState> {
        match &self.room_state {
            Some(RoomState::Multiplayer(state)) => Some(state),
            _ => None,
        }
    }

    fn apply(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::InRoomStatus {
                status,
                room_info,
                room_state,
            } => {
                self.status = status;
                self.room_info = room_info;
                self.room_state = room_state;
            }
            ServerMessage::RoomStateUpdate { state } => {
                if self.status != InRoomStatus::None {
                    self.room_state = Some(state);
                }
            }
            _ => {}
        }
    }
}

/// A connected bot.
pub struct BotSession {
    ctx: Arc<ServerContext>,
    userid: String,
    session_id: SessionId,
    view: watch::Receiver<RoomView>,
    binary_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    listener: JoinHandle<()>,
}

impl BotSession {
    /// Register `userid` as a bot session.
    pub async fn connect(ctx: Arc<ServerContext>, userid: &str, username: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
        let session_id = ctx.connect(userid, username, true, tx).await;

        let (view_tx, view) = watch::channel(RoomView::default());
        let (binary_tx, binary_rx) = mpsc::unbounded_channel();
        let log_id = session_id.clone();
        let listener = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Json(msg) => {
                        trace!(session_id = %log_id, ?msg, "Bot received");
                        view_tx.send_modify(|view| view.apply(msg));
                    }
                    Outbound::Binary(frame) => {
                        // The game loop may already be gone
                        let _ = binary_tx.send(frame);
                    }
                }
            }
            debug!(session_id = %log_id, "Bot listener closed");
        });

        Self {
            ctx,
            userid: userid.to_string(),
            session_id,
            view,
            binary_rx,
            listener,
        }
    }

    /// The bot's user id.
    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// The bot's session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Server context the bot is connected to.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> RoomView {
        self.view.borrow().clone()
    }

    /// Current status.
    pub fn status(&self) -> InRoomStatus {
        self.view.borrow().status
    }

    /// Send a control message.
    pub async fn send(&self, msg: ClientMessage) {
        self.ctx.handle_message(&self.session_id, msg).await;
    }

    /// Send a room event.
    pub async fn send_event(&self, event: ClientRoomEvent) {
        self.send(ClientMessage::ClientRoomEvent { event }).await;
    }

    /// Send a binary gameplay frame.
    pub async fn send_binary(&self, frame: &[u8]) {
        self.ctx.handle_binary(&self.session_id, frame).await;
    }

    /// Relayed frames received since the last call.
    pub fn drain_binary(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.binary_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Wait until `pred` holds for the view. Returns false on timeout or if
    /// the session closed first.
    pub async fn wait_until<F>(&mut self, timeout: Duration, pred: F) -> bool
    where
        F: FnMut(&RoomView) -> bool,
    {
        matches!(
            tokio::time::timeout(timeout, self.view.wait_for(pred)).await,
            Ok(Ok(_))
        )
    }

    /// Close the session.
    pub async fn disconnect(self) {
        self.ctx.disconnect(&self.session_id).await;
        self.listener.abort();
    }
}
