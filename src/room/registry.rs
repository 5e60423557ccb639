//! Room Registry
//!
//! Creates and destroys rooms and maps every member session to its room.
//! A session belongs to at most one room; joining anything frees the session
//! from its previous room first. Locks are taken room first, registry maps
//! second; a room is never locked while a registry map is held.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::lifecycle::{Room, RoomKind, RoomPlayer, SessionRef};
use super::puzzle_rush::PuzzleRushRoom;
use super::solo::SoloRoom;
use super::state::{RoomId, RoomType};
use super::{RoomError, RoomServices};
use crate::network::protocol::{ClientRoomEvent, ServerMessage};
use crate::network::session::SessionId;

/// Room id that resolves to the featured live ranked room.
pub const TV_ROOM_ID: &str = "tv";

/// Every live room, indexed by id and by member session.
pub struct RoomRegistry {
    services: Arc<RoomServices>,
    rooms: RwLock<BTreeMap<RoomId, Arc<Mutex<Room>>>>,
    session_rooms: RwLock<BTreeMap<SessionId, RoomId>>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new(services: Arc<RoomServices>) -> Self {
        Self {
            services,
            rooms: RwLock::new(BTreeMap::new()),
            session_rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Shared room services.
    pub fn services(&self) -> &Arc<RoomServices> {
        &self.services
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Room by id.
    pub async fn get_room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Room a session is in, as player or spectator.
    pub async fn room_of_session(&self, session_id: &str) -> Option<Arc<Mutex<Room>>> {
        let room_id = self.session_rooms.read().await.get(session_id).cloned()?;
        self.get_room(&room_id).await
    }

    /// Build a room for `players`, all of whom must still be online. Each
    /// player session is freed from its previous room, gets the room's
    /// activity and an IN_ROOM_STATUS.
    pub async fn create_room(
        &self,
        room_type: RoomType,
        players: Vec<RoomPlayer>,
        kind: RoomKind,
    ) -> Result<Arc<Mutex<Room>>, RoomError> {
        let directory = &self.services.directory;
        if let Some(offline) = players.iter().find(|p| !directory.is_online(&p.session_id)) {
            warn!(userid = %offline.userid, "Room creation aborted, player offline");
            return Err(RoomError::Aborted {
                userid: offline.userid.clone(),
                session_id: offline.session_id.clone(),
            });
        }
        for player in &players {
            self.free_session(&player.session_id).await;
        }

        let room_id = uuid::Uuid::new_v4().to_string();
        let room = Room::create(
            room_id.clone(),
            room_type,
            players,
            kind,
            Arc::clone(&self.services),
        )
        .await?;

        self.rooms
            .write()
            .await
            .insert(room_id.clone(), Arc::clone(&room));
        {
            let guard = room.lock().await;
            let activity = guard.activity();
            let mut session_rooms = self.session_rooms.write().await;
            for player in guard.players() {
                session_rooms.insert(player.session_id.clone(), room_id.clone());
                directory.set_activity(&player.userid, activity, &player.session_id);
                directory.send_to_session(&player.session_id, guard.in_room_status(&player.session_id));
            }
        }
        Ok(room)
    }

    /// Solo room for one session.
    pub async fn create_solo_room(&self, session: &SessionRef) -> Result<Arc<Mutex<Room>>, RoomError> {
        let player = self.room_player(session).await;
        self.create_room(RoomType::Solo, vec![player], RoomKind::Solo(SoloRoom::new()))
            .await
    }

    /// Single-player puzzle rush for one session.
    pub async fn create_puzzle_rush(&self, session: &SessionRef) -> Result<Arc<Mutex<Room>>, RoomError> {
        let player = self.room_player(session).await;
        self.create_room(
            RoomType::PuzzleRush,
            vec![player],
            RoomKind::PuzzleRush(PuzzleRushRoom::new()),
        )
        .await
    }

    async fn room_player(&self, session: &SessionRef) -> RoomPlayer {
        let username = match self.services.directory.username_of(&session.session_id) {
            Some(name) => name,
            None => self
                .services
                .users
                .get(&session.userid)
                .await
                .map(|r| r.username)
                .unwrap_or_else(|_| session.userid.clone()),
        };
        RoomPlayer::new(&session.userid, username, &session.session_id)
    }

    /// Spectate a room by id, or the featured room for [`TV_ROOM_ID`].
    /// Returns the IN_ROOM_STATUS also sent to the session.
    pub async fn spectate_room(
        &self,
        room_id: &str,
        session: &SessionRef,
    ) -> Result<ServerMessage, RoomError> {
        let room = if room_id == TV_ROOM_ID {
            self.tv_room()
                .await
                .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?
        } else {
            self.get_room(room_id)
                .await
                .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?
        };

        if let Some(current) = self.room_of_session(&session.session_id).await {
            if Arc::ptr_eq(&current, &room) {
                let guard = room.lock().await;
                return Ok(guard.in_room_status(&session.session_id));
            }
        }
        if !room.lock().await.allows_spectators() {
            return Err(RoomError::SpectatingDisabled);
        }
        self.free_session(&session.session_id).await;

        let mut guard = room.lock().await;
        if guard.is_destroyed() {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }
        guard.add_spectator(session.clone())?;
        let room_id = guard.id().to_string();
        self.session_rooms
            .write()
            .await
            .insert(session.session_id.clone(), room_id.clone());

        let status = guard.in_room_status(&session.session_id);
        self.services
            .directory
            .send_to_session(&session.session_id, status.clone());
        info!(room_id = %room_id, userid = %session.userid, "Spectating room");
        Ok(status)
    }

    /// Spectate whichever room `target` is currently playing in.
    pub async fn spectate_user(
        &self,
        target: &str,
        session: &SessionRef,
    ) -> Result<ServerMessage, RoomError> {
        for target_session in self.services.directory.sessions_of(target) {
            let Some(room) = self.room_of_session(&target_session).await else {
                continue;
            };
            let room_id = {
                let guard = room.lock().await;
                if guard.slot_of_session(&target_session).is_none() {
                    continue;
                }
                guard.id().to_string()
            };
            return self.spectate_room(&room_id, session).await;
        }
        Err(RoomError::NotInRoom)
    }

    /// Live room with the best featured-room score.
    pub async fn tv_room(&self) -> Option<Arc<Mutex<Room>>> {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.read().await.values().cloned().collect();
        let mut best: Option<(f64, Arc<Mutex<Room>>)> = None;
        for room in rooms {
            let score = room.lock().await.tv_score();
            if let Some(score) = score {
                if best.as_ref().map_or(true, |(b, _)| score > *b) {
                    best = Some((score, room));
                }
            }
        }
        best.map(|(_, room)| room)
    }

    /// Leave the session's room. Players are marked as left, spectators are
    /// removed. The room is destroyed once every player has left.
    pub async fn leave_room(&self, session_id: &str) -> Result<(), RoomError> {
        let room_id = self
            .session_rooms
            .write()
            .await
            .remove(session_id)
            .ok_or(RoomError::NotInRoom)?;
        let Some(room) = self.get_room(&room_id).await else {
            return Err(RoomError::RoomNotFound(room_id));
        };

        let mut guard = room.lock().await;
        if !guard.player_leave(session_id).await {
            guard.remove_spectator(session_id);
        }
        self.services
            .directory
            .send_to_session(session_id, ServerMessage::not_in_room());

        if guard.all_players_left() && !guard.is_destroyed() {
            let spectators = guard.destroy().await;
            drop(guard);
            self.forget_room(&room_id, &spectators).await;
        }
        Ok(())
    }

    /// Leave the current room if there is one.
    pub async fn free_session(&self, session_id: &str) {
        match self.leave_room(session_id).await {
            Ok(()) => debug!(session_id = %session_id, "Session freed from room"),
            Err(RoomError::NotInRoom) => {}
            Err(err) => warn!(session_id = %session_id, error = %err, "Failed to free session"),
        }
    }

    /// Connection closed.
    pub async fn on_session_disconnect(&self, session_id: &str) {
        self.free_session(session_id).await;
    }

    /// Binary gameplay frame from a session.
    pub async fn on_binary(&self, session_id: &str, frame: &[u8]) {
        let Some(room) = self.room_of_session(session_id).await else {
            debug!(session_id = %session_id, "Binary frame outside a room");
            return;
        };
        room.lock().await.on_binary(session_id, frame).await;
    }

    /// JSON room event from a session.
    pub async fn on_client_event(
        &self,
        sender: &SessionRef,
        event: ClientRoomEvent,
    ) -> Result<(), RoomError> {
        let room = self
            .room_of_session(&sender.session_id)
            .await
            .ok_or(RoomError::NotInRoom)?;
        let mut guard = room.lock().await;
        guard.on_client_event(sender, event).await
    }

    /// Chat line to everyone in the sender's room.
    pub async fn chat(&self, session_id: &str, username: &str, message: &str) -> Result<(), RoomError> {
        let room = self
            .room_of_session(session_id)
            .await
            .ok_or(RoomError::NotInRoom)?;
        let guard = room.lock().await;
        guard.send_chat(username, message);
        Ok(())
    }

    /// Destroy every room.
    pub async fn shutdown(&self) {
        let rooms: Vec<(RoomId, Arc<Mutex<Room>>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), Arc::clone(room)))
            .collect();
        for (room_id, room) in rooms {
            let spectators = room.lock().await.destroy().await;
            self.forget_room(&room_id, &spectators).await;
        }
        info!("All rooms destroyed");
    }

    async fn forget_room(&self, room_id: &str, spectators: &[SessionId]) {
        self.rooms.write().await.remove(room_id);
        let mut session_rooms = self.session_rooms.write().await;
        for session_id in spectators {
            session_rooms.remove(session_id);
        }
        session_rooms.retain(|_, id| id != room_id);
    }
}
