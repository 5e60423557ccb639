//! Room lifecycle shared by every room kind.
//!
//! [`RoomCore`] owns the fixed player slots, the spectator list, the audience
//! used for broadcasts and the room's timers. [`RoomBehavior`] is the
//! per-kind strategy. [`Room`] glues the two and is what the registry locks.
//!
//! Timers are tokio tasks holding a weak handle to the room; they lock the
//! room when they fire and are aborted when the room is destroyed.

use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::multiplayer::MultiplayerRoom;
use super::puzzle_rush::PuzzleRushRoom;
use super::solo::SoloRoom;
use super::state::{RoomId, RoomInfo, RoomPlayerInfo, RoomState, RoomType};
use super::{RoomConfig, RoomError, RoomServices};
use crate::network::packet::{encode_slot_frame, Packet};
use crate::network::protocol::{ClientRoomEvent, InRoomStatus, ServerMessage};
use crate::network::session::{ActivityType, SessionDirectory, SessionId};
use crate::user::UserId;

/// A user acting through one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    /// User id.
    pub userid: UserId,
    /// Session id.
    pub session_id: SessionId,
}

impl SessionRef {
    /// Convenience constructor.
    pub fn new(userid: impl Into<UserId>, session_id: impl Into<SessionId>) -> Self {
        Self {
            userid: userid.into(),
            session_id: session_id.into(),
        }
    }
}

/// A fixed player slot. Never removed, only marked as left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPlayer {
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
    /// Session playing the slot.
    pub session_id: SessionId,
    /// Set once the player leaves.
    pub left: bool,
}

impl RoomPlayer {
    /// Player who has not left.
    pub fn new(userid: impl Into<UserId>, username: impl Into<String>, session_id: impl Into<SessionId>) -> Self {
        Self {
            userid: userid.into(),
            username: username.into(),
            session_id: session_id.into(),
            left: false,
        }
    }
}

/// Timers a room can schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTimer {
    /// Both players ready, start the point.
    StartGame,
    /// Both players ready after the match, start over.
    Rematch,
    /// Send recoveries to a freshly joined spectator.
    SpectatorRecovery(SessionId),
    /// Puzzle clock for the given round ran out.
    PuzzleClock(u32),
}

// =============================================================================
// AUDIENCE
// =============================================================================

/// Sessions that receive the room's broadcasts. Shared with state listeners.
pub struct RoomAudience {
    directory: Arc<SessionDirectory>,
    members: RwLock<Vec<SessionId>>,
}

impl RoomAudience {
    fn new(directory: Arc<SessionDirectory>, members: Vec<SessionId>) -> Self {
        Self {
            directory,
            members: RwLock::new(members),
        }
    }

    fn members(&self) -> Vec<SessionId> {
        match self.members.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn add(&self, session_id: &str) {
        let mut members = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !members.iter().any(|s| s == session_id) {
            members.push(session_id.to_string());
        }
    }

    fn remove(&self, session_id: &str) {
        let mut members = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        members.retain(|s| s != session_id);
    }

    /// Send a JSON message to every member.
    pub fn broadcast(&self, msg: ServerMessage) {
        for session_id in self.members() {
            self.directory.send_to_session(&session_id, msg.clone());
        }
    }

    /// Send a binary frame to every member but one.
    pub fn send_binary_except(&self, except: &str, data: &[u8]) {
        for session_id in self.members().iter().filter(|s| *s != except) {
            self.directory.send_binary(session_id, data.to_vec());
        }
    }
}

// =============================================================================
// CORE
// =============================================================================

/// State every room kind shares.
pub struct RoomCore {
    id: RoomId,
    room_type: RoomType,
    players: Vec<RoomPlayer>,
    spectators: Vec<SessionRef>,
    audience: Arc<RoomAudience>,
    services: Arc<RoomServices>,
    handle: Weak<Mutex<Room>>,
    timers: Vec<JoinHandle<()>>,
    created_at: Instant,
    destroyed: bool,
}

impl RoomCore {
    fn new(
        id: RoomId,
        room_type: RoomType,
        players: Vec<RoomPlayer>,
        services: Arc<RoomServices>,
        handle: Weak<Mutex<Room>>,
    ) -> Self {
        let members = players.iter().map(|p| p.session_id.clone()).collect();
        Self {
            audience: Arc::new(RoomAudience::new(Arc::clone(&services.directory), members)),
            id,
            room_type,
            players,
            spectators: Vec::new(),
            services,
            handle,
            timers: Vec::new(),
            created_at: Instant::now(),
            destroyed: false,
        }
    }

    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Room kind.
    pub fn room_type(&self) -> RoomType {
        self.room_type
    }

    /// Fixed players in slot order.
    pub fn players(&self) -> &[RoomPlayer] {
        &self.players
    }

    /// Player in a slot.
    pub fn player(&self, slot: usize) -> Option<&RoomPlayer> {
        self.players.get(slot)
    }

    /// Current spectators.
    pub fn spectators(&self) -> &[SessionRef] {
        &self.spectators
    }

    /// Shared services.
    pub fn services(&self) -> &Arc<RoomServices> {
        &self.services
    }

    /// Session directory.
    pub fn directory(&self) -> &SessionDirectory {
        &self.services.directory
    }

    /// Room timing.
    pub fn config(&self) -> &RoomConfig {
        &self.services.config
    }

    /// When the room was built.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Slot of a session that is still playing.
    pub fn slot_of_session(&self, session_id: &str) -> Option<usize> {
        self.players
            .iter()
            .position(|p| !p.left && p.session_id == session_id)
    }

    /// Listener that pushes every new state to the audience.
    pub fn broadcaster<T>(&self, wrap: fn(T) -> RoomState) -> impl Fn(&T) + Send + Sync + 'static
    where
        T: Clone + 'static,
    {
        let audience = Arc::clone(&self.audience);
        move |value: &T| {
            audience.broadcast(ServerMessage::RoomStateUpdate {
                state: wrap(value.clone()),
            })
        }
    }

    /// Send a JSON message to everyone in the room.
    pub fn broadcast(&self, msg: ServerMessage) {
        self.audience.broadcast(msg);
    }

    /// Send a JSON message to one session.
    pub fn send_to(&self, session_id: &str, msg: ServerMessage) {
        self.directory().send_to_session(session_id, msg);
    }

    /// Forward a player's frame to everyone else, prefixed with the slot.
    pub fn relay(&self, slot: usize, frame: &[u8]) {
        let Some(player) = self.players.get(slot) else {
            return;
        };
        let data = encode_slot_frame(slot as u8, frame);
        self.audience.send_binary_except(&player.session_id, &data);
    }

    /// Send one slot's packet to a single session.
    pub fn send_slot_packet(&self, session_id: &str, slot: usize, packet: &Packet) {
        match packet.to_bytes() {
            Ok(bytes) => {
                self.directory()
                    .send_binary(session_id, encode_slot_frame(slot as u8, &bytes));
            }
            Err(err) => warn!(room_id = %self.id, slot, error = %err, "Failed to encode packet"),
        }
    }

    /// Fire `timer` after `delay` unless the room is destroyed first.
    pub fn schedule(&mut self, delay: Duration, timer: RoomTimer) {
        self.timers.retain(|h| !h.is_finished());
        let handle = self.handle.clone();
        self.timers.push(tokio::spawn(fire_timer(handle, delay, timer)));
    }

    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

async fn fire_timer(handle: Weak<Mutex<Room>>, delay: Duration, timer: RoomTimer) {
    tokio::time::sleep(delay).await;
    let Some(room) = handle.upgrade() else {
        return;
    };
    let mut room = room.lock().await;
    room.on_timer(timer).await;
}

// =============================================================================
// BEHAVIOR
// =============================================================================

/// Per-kind room logic. Every method receives the shared core.
#[async_trait]
pub trait RoomBehavior: Send {
    /// Subscribe the broadcaster and build the first state.
    async fn init_state(&mut self, core: &mut RoomCore) -> Result<(), RoomError>;

    /// Current state, wrapped.
    fn state(&self) -> RoomState;

    /// Activity flag for the players.
    fn activity(&self) -> ActivityType;

    /// JSON event from a player (`slot` set) or a spectator.
    async fn on_client_event(
        &mut self,
        core: &mut RoomCore,
        sender: &SessionRef,
        slot: Option<usize>,
        event: ClientRoomEvent,
    ) -> Result<(), RoomError>;

    /// Binary frame from a player.
    async fn on_binary(&mut self, core: &mut RoomCore, slot: usize, frame: &[u8]);

    /// A player left. The slot is already marked.
    async fn on_player_leave(&mut self, core: &mut RoomCore, slot: usize);

    /// A spectator joined.
    fn on_spectator_join(&mut self, core: &mut RoomCore, session_id: &str) {
        let delay = core.config().spectator_recovery_delay;
        core.schedule(delay, RoomTimer::SpectatorRecovery(session_id.to_string()));
    }

    /// A scheduled timer fired.
    async fn on_timer(&mut self, core: &mut RoomCore, timer: RoomTimer);

    /// The room is going away.
    async fn on_delete(&mut self, _core: &mut RoomCore) {}

    /// Whether spectators may join.
    fn allows_spectators(&self) -> bool {
        true
    }

    /// Ranking for the featured-room lookup. `None` means never featured.
    fn tv_score(&self, _core: &RoomCore) -> Option<f64> {
        None
    }
}

/// Concrete room strategies.
pub enum RoomKind {
    /// Solo.
    Solo(SoloRoom),
    /// Multiplayer, casual or ranked.
    Multiplayer(MultiplayerRoom),
    /// Puzzle rush or battle.
    PuzzleRush(PuzzleRushRoom),
}

impl RoomKind {
    fn behavior(&self) -> &dyn RoomBehavior {
        match self {
            RoomKind::Solo(room) => room,
            RoomKind::Multiplayer(room) => room,
            RoomKind::PuzzleRush(room) => room,
        }
    }

    fn behavior_mut(&mut self) -> &mut dyn RoomBehavior {
        match self {
            RoomKind::Solo(room) => room,
            RoomKind::Multiplayer(room) => room,
            RoomKind::PuzzleRush(room) => room,
        }
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// A live room.
pub struct Room {
    core: RoomCore,
    kind: RoomKind,
}

impl Room {
    /// Build a room and its first state.
    pub async fn create(
        id: RoomId,
        room_type: RoomType,
        players: Vec<RoomPlayer>,
        kind: RoomKind,
        services: Arc<RoomServices>,
    ) -> Result<Arc<Mutex<Room>>, RoomError> {
        let room = Arc::new_cyclic(|handle| {
            Mutex::new(Room {
                core: RoomCore::new(id, room_type, players, services, handle.clone()),
                kind,
            })
        });
        {
            let mut guard = room.lock().await;
            let Room { core, kind } = &mut *guard;
            kind.behavior_mut().init_state(core).await?;
            info!(room_id = %core.id, room_type = ?core.room_type, "Room created");
        }
        Ok(room)
    }

    /// Room id.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Room kind.
    pub fn room_type(&self) -> RoomType {
        self.core.room_type
    }

    /// Strategy.
    pub fn kind(&self) -> &RoomKind {
        &self.kind
    }

    /// Fixed players.
    pub fn players(&self) -> &[RoomPlayer] {
        &self.core.players
    }

    /// Activity flag for the players.
    pub fn activity(&self) -> ActivityType {
        self.kind.behavior().activity()
    }

    /// Current state.
    pub fn state(&self) -> RoomState {
        self.kind.behavior().state()
    }

    /// Summary.
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.core.id.clone(),
            room_type: self.core.room_type,
            players: self
                .core
                .players
                .iter()
                .map(|p| RoomPlayerInfo {
                    userid: p.userid.clone(),
                    username: p.username.clone(),
                })
                .collect(),
        }
    }

    /// IN_ROOM_STATUS for a member session.
    pub fn in_room_status(&self, session_id: &str) -> ServerMessage {
        let status = if self.core.slot_of_session(session_id).is_some() {
            InRoomStatus::Player
        } else if self.is_spectator(session_id) {
            InRoomStatus::Spectator
        } else {
            return ServerMessage::not_in_room();
        };
        ServerMessage::InRoomStatus {
            status,
            room_info: Some(self.info()),
            room_state: Some(self.state()),
        }
    }

    /// Slot of an active player session.
    pub fn slot_of_session(&self, session_id: &str) -> Option<usize> {
        self.core.slot_of_session(session_id)
    }

    /// True if the session spectates.
    pub fn is_spectator(&self, session_id: &str) -> bool {
        self.core.spectators.iter().any(|s| s.session_id == session_id)
    }

    /// Binary frame from a member. Spectator frames are dropped.
    pub async fn on_binary(&mut self, session_id: &str, frame: &[u8]) {
        let Some(slot) = self.core.slot_of_session(session_id) else {
            debug!(room_id = %self.core.id, "Dropping frame from non-player");
            return;
        };
        let Room { core, kind } = self;
        kind.behavior_mut().on_binary(core, slot, frame).await;
    }

    /// JSON room event from a member.
    pub async fn on_client_event(
        &mut self,
        sender: &SessionRef,
        event: ClientRoomEvent,
    ) -> Result<(), RoomError> {
        let slot = self.core.slot_of_session(&sender.session_id);
        if slot.is_none() && !self.is_spectator(&sender.session_id) {
            return Err(RoomError::NotInRoom);
        }
        let Room { core, kind } = self;
        kind.behavior_mut().on_client_event(core, sender, slot, event).await
    }

    /// True if the room kind accepts spectators.
    pub fn allows_spectators(&self) -> bool {
        self.kind.behavior().allows_spectators()
    }

    /// Add a spectator. The caller sends IN_ROOM_STATUS.
    pub fn add_spectator(&mut self, spectator: SessionRef) -> Result<(), RoomError> {
        if !self.kind.behavior().allows_spectators() {
            return Err(RoomError::SpectatingDisabled);
        }
        if self.is_spectator(&spectator.session_id) {
            return Ok(());
        }
        self.core.audience.add(&spectator.session_id);
        let session_id = spectator.session_id.clone();
        self.core.spectators.push(spectator);
        debug!(room_id = %self.core.id, session_id = %session_id, "Spectator joined");

        let Room { core, kind } = self;
        kind.behavior_mut().on_spectator_join(core, &session_id);
        Ok(())
    }

    /// Remove a spectator.
    pub fn remove_spectator(&mut self, session_id: &str) -> bool {
        let before = self.core.spectators.len();
        self.core.spectators.retain(|s| s.session_id != session_id);
        self.core.audience.remove(session_id);
        self.core.spectators.len() != before
    }

    /// Mark a player as left and run the leave hook.
    pub async fn player_leave(&mut self, session_id: &str) -> bool {
        let Some(slot) = self.core.slot_of_session(session_id) else {
            return false;
        };
        let activity = self.activity();
        let player = &mut self.core.players[slot];
        player.left = true;
        let userid = player.userid.clone();
        self.core.audience.remove(session_id);
        self.core.directory().reset_activity_if(&userid, activity);
        info!(room_id = %self.core.id, userid = %userid, slot, "Player left room");

        let Room { core, kind } = self;
        kind.behavior_mut().on_player_leave(core, slot).await;
        true
    }

    /// True once every fixed player has left.
    pub fn all_players_left(&self) -> bool {
        self.core.players.iter().all(|p| p.left)
    }

    /// Tear the room down. Returns the spectators that were still present,
    /// who have been told they are no longer in a room.
    pub async fn destroy(&mut self) -> Vec<SessionId> {
        if self.core.destroyed {
            return Vec::new();
        }
        self.core.destroyed = true;
        self.core.cancel_timers();
        {
            let Room { core, kind } = &mut *self;
            kind.behavior_mut().on_delete(core).await;
        }

        let spectators: Vec<SessionId> = self
            .core
            .spectators
            .drain(..)
            .map(|s| s.session_id)
            .collect();
        for session_id in &spectators {
            self.core.audience.remove(session_id);
            self.core.send_to(session_id, ServerMessage::not_in_room());
        }
        info!(room_id = %self.core.id, "Room destroyed");
        spectators
    }

    /// True after [`Room::destroy`].
    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed
    }

    /// Run a fired timer.
    pub async fn on_timer(&mut self, timer: RoomTimer) {
        if self.core.destroyed {
            return;
        }
        let Room { core, kind } = self;
        kind.behavior_mut().on_timer(core, timer).await;
    }

    /// Relay a chat line to everyone in the room.
    pub fn send_chat(&self, username: &str, message: &str) {
        self.core.broadcast(ServerMessage::Chat {
            username: username.to_string(),
            message: message.to_string(),
        });
    }

    /// Ranking for the featured-room lookup.
    pub fn tv_score(&self) -> Option<f64> {
        self.kind.behavior().tv_score(&self.core)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::room::state::SoloRoomState;

    async fn create_solo(services: &Arc<RoomServices>, client: &TestClient) -> Arc<Mutex<Room>> {
        Room::create(
            "room-1".into(),
            RoomType::Solo,
            vec![RoomPlayer::new(&client.userid, "alice", &client.session_id)],
            RoomKind::Solo(SoloRoom::new()),
            Arc::clone(services),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_broadcasts_initial_state() {
        let services = create_test_services();
        let mut alice = connect(&services, "alice").await;
        let room = create_solo(&services, &alice).await;

        let room = room.lock().await;
        assert_eq!(room.state(), RoomState::Solo(SoloRoomState::default()));
        let msgs = alice.json();
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomStateUpdate { .. })));
    }

    #[tokio::test]
    async fn test_in_room_status_by_role() {
        let services = create_test_services();
        let alice = connect(&services, "alice").await;
        let bob = connect(&services, "bob").await;
        let room = create_solo(&services, &alice).await;
        let mut room = room.lock().await;

        room.add_spectator(SessionRef::new(&bob.userid, &bob.session_id))
            .unwrap();
        assert!(matches!(
            room.in_room_status(&alice.session_id),
            ServerMessage::InRoomStatus { status: InRoomStatus::Player, .. }
        ));
        assert!(matches!(
            room.in_room_status(&bob.session_id),
            ServerMessage::InRoomStatus { status: InRoomStatus::Spectator, .. }
        ));
        assert_eq!(room.in_room_status("nobody"), ServerMessage::not_in_room());
    }

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let services = create_test_services();
        let mut alice = connect(&services, "alice").await;
        let mut bob = connect(&services, "bob").await;
        let room = create_solo(&services, &alice).await;
        let mut room = room.lock().await;
        room.add_spectator(SessionRef::new(&bob.userid, &bob.session_id))
            .unwrap();

        room.core.relay(0, &[5]);
        assert!(alice.binary().is_empty());
        assert_eq!(bob.binary(), vec![vec![0, 5]]);
    }

    #[tokio::test]
    async fn test_leave_and_destroy() {
        let services = create_test_services();
        let alice = connect(&services, "alice").await;
        let mut bob = connect(&services, "bob").await;
        let room = create_solo(&services, &alice).await;
        let mut room = room.lock().await;
        room.add_spectator(SessionRef::new(&bob.userid, &bob.session_id))
            .unwrap();

        assert!(!room.all_players_left());
        assert!(room.player_leave(&alice.session_id).await);
        assert!(!room.player_leave(&alice.session_id).await);
        assert!(room.all_players_left());

        bob.json();
        let spectators = room.destroy().await;
        assert_eq!(spectators, vec![bob.session_id.clone()]);
        assert_eq!(bob.json(), vec![ServerMessage::not_in_room()]);
        assert!(room.destroy().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_member_event_rejected() {
        let services = create_test_services();
        let alice = connect(&services, "alice").await;
        let room = create_solo(&services, &alice).await;
        let mut room = room.lock().await;
        let stranger = SessionRef::new("x", "nope");
        let err = room
            .on_client_event(&stranger, ClientRoomEvent::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::NotInRoom));
    }
}
