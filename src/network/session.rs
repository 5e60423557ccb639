//! Session Directory
//!
//! Maps live connections to users. One user may have several sessions; each
//! session has an outbound channel drained by its connection's writer task.
//! The directory also tracks what each user is currently doing so the queue
//! and the rooms can refuse users who are busy elsewhere.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::protocol::ServerMessage;
use crate::user::UserId;

/// Session identifier.
pub type SessionId = String;

/// Item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON control message.
    Json(ServerMessage),
    /// Binary game frame.
    Binary(Vec<u8>),
}

/// What a user is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    /// Solo room.
    Solo,
    /// Multiplayer room.
    Multiplayer,
    /// Puzzle screen.
    Puzzles,
    /// Ranked queue.
    Queueing,
    /// Puzzle rush room.
    PuzzleRush,
    /// Puzzle battle room.
    PuzzleBattles,
}

/// Activity plus the session doing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserActivity {
    /// Activity kind.
    pub kind: ActivityType,
    /// Session that started it.
    pub session_id: SessionId,
}

struct SessionEntry {
    userid: UserId,
    username: String,
    sender: mpsc::Sender<Outbound>,
}

#[derive(Default)]
struct DirectoryState {
    sessions: BTreeMap<SessionId, SessionEntry>,
    user_sessions: BTreeMap<UserId, Vec<SessionId>>,
    activities: BTreeMap<UserId, UserActivity>,
}

/// Live sessions and user activities.
#[derive(Default)]
pub struct SessionDirectory {
    state: RwLock<DirectoryState>,
}

impl SessionDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    // Every write leaves the maps consistent, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, DirectoryState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, DirectoryState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a connection and return its new session id.
    pub fn register(
        &self,
        userid: impl Into<UserId>,
        username: impl Into<String>,
        sender: mpsc::Sender<Outbound>,
    ) -> SessionId {
        let userid = userid.into();
        let session_id = uuid::Uuid::new_v4().to_string();
        let mut state = self.write();
        state.sessions.insert(
            session_id.clone(),
            SessionEntry {
                userid: userid.clone(),
                username: username.into(),
                sender,
            },
        );
        state
            .user_sessions
            .entry(userid.clone())
            .or_default()
            .push(session_id.clone());
        debug!("Session {} registered for {}", session_id, userid);
        session_id
    }

    /// Remove a session. Clears the user's activity if this session owned it.
    pub fn remove(&self, session_id: &str) -> Option<UserId> {
        let mut state = self.write();
        let entry = state.sessions.remove(session_id)?;
        let userid = entry.userid;

        if let Some(list) = state.user_sessions.get_mut(&userid) {
            list.retain(|s| s != session_id);
            if list.is_empty() {
                state.user_sessions.remove(&userid);
            }
        }
        if state
            .activities
            .get(&userid)
            .is_some_and(|a| a.session_id == session_id)
        {
            state.activities.remove(&userid);
        }
        debug!("Session {} removed", session_id);
        Some(userid)
    }

    /// User owning a session.
    pub fn userid_of(&self, session_id: &str) -> Option<UserId> {
        self.read().sessions.get(session_id).map(|e| e.userid.clone())
    }

    /// Display name for a session.
    pub fn username_of(&self, session_id: &str) -> Option<String> {
        self.read()
            .sessions
            .get(session_id)
            .map(|e| e.username.clone())
    }

    /// All sessions of a user, oldest first.
    pub fn sessions_of(&self, userid: &str) -> Vec<SessionId> {
        self.read()
            .user_sessions
            .get(userid)
            .cloned()
            .unwrap_or_default()
    }

    /// True if the session is registered.
    pub fn is_online(&self, session_id: &str) -> bool {
        self.read().sessions.contains_key(session_id)
    }

    /// True if the user has at least one session.
    pub fn is_user_online(&self, userid: &str) -> bool {
        self.read().user_sessions.contains_key(userid)
    }

    fn push(entry: &SessionEntry, session_id: &str, item: Outbound) -> bool {
        match entry.sender.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full for session {}, dropping", session_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Session {} channel closed", session_id);
                false
            }
        }
    }

    /// Send a JSON message to one session.
    pub fn send_to_session(&self, session_id: &str, msg: ServerMessage) -> bool {
        let state = self.read();
        match state.sessions.get(session_id) {
            Some(entry) => Self::push(entry, session_id, Outbound::Json(msg)),
            None => false,
        }
    }

    /// Send a binary frame to one session.
    pub fn send_binary(&self, session_id: &str, data: Vec<u8>) -> bool {
        let state = self.read();
        match state.sessions.get(session_id) {
            Some(entry) => Self::push(entry, session_id, Outbound::Binary(data)),
            None => false,
        }
    }

    /// Send a JSON message to every session of a user.
    pub fn send_to_user(&self, userid: &str, msg: ServerMessage) -> usize {
        let state = self.read();
        let Some(sessions) = state.user_sessions.get(userid) else {
            return 0;
        };
        sessions
            .iter()
            .filter_map(|sid| state.sessions.get(sid).map(|e| (sid, e)))
            .filter(|(sid, entry)| Self::push(entry, sid, Outbound::Json(msg.clone())))
            .count()
    }

    /// Send a JSON message to every session.
    pub fn send_to_all(&self, msg: ServerMessage) -> usize {
        let state = self.read();
        state
            .sessions
            .iter()
            .filter(|(sid, entry)| Self::push(entry, sid, Outbound::Json(msg.clone())))
            .count()
    }

    /// Record what a user is doing.
    pub fn set_activity(&self, userid: &str, kind: ActivityType, session_id: &str) {
        self.write().activities.insert(
            userid.to_string(),
            UserActivity {
                kind,
                session_id: session_id.to_string(),
            },
        );
    }

    /// Current activity.
    pub fn activity(&self, userid: &str) -> Option<UserActivity> {
        self.read().activities.get(userid).cloned()
    }

    /// Clear a user's activity only if it is of `kind`.
    pub fn reset_activity_if(&self, userid: &str, kind: ActivityType) -> bool {
        let mut state = self.write();
        if state.activities.get(userid).is_some_and(|a| a.kind == kind) {
            state.activities.remove(userid);
            true
        } else {
            false
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_send() {
        let dir = SessionDirectory::new();
        let (tx, mut rx) = mpsc::channel(8);
        let sid = dir.register("u1", "alice", tx);

        assert!(dir.is_online(&sid));
        assert_eq!(dir.userid_of(&sid).as_deref(), Some("u1"));
        assert_eq!(dir.username_of(&sid).as_deref(), Some("alice"));

        assert!(dir.send_to_session(&sid, ServerMessage::go_to("/")));
        assert!(dir.send_binary(&sid, vec![1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Json(ServerMessage::go_to("/")));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_user_with_two_sessions() {
        let dir = SessionDirectory::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let s1 = dir.register("u1", "alice", tx1);
        let s2 = dir.register("u1", "alice", tx2);

        assert_eq!(dir.sessions_of("u1"), vec![s1.clone(), s2.clone()]);
        assert_eq!(dir.send_to_user("u1", ServerMessage::not_in_room()), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        dir.remove(&s1);
        assert!(dir.is_user_online("u1"));
        dir.remove(&s2);
        assert!(!dir.is_user_online("u1"));
        assert_eq!(dir.session_count(), 0);
    }

    #[test]
    fn test_full_buffer_drops() {
        let dir = SessionDirectory::new();
        let (tx, _rx) = mpsc::channel(1);
        let sid = dir.register("u1", "alice", tx);
        assert!(dir.send_binary(&sid, vec![0]));
        assert!(!dir.send_binary(&sid, vec![1]));
    }

    #[test]
    fn test_activity_cleared_with_owning_session() {
        let dir = SessionDirectory::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let s1 = dir.register("u1", "alice", tx1);
        let s2 = dir.register("u1", "alice", tx2);

        dir.set_activity("u1", ActivityType::Queueing, &s2);
        dir.remove(&s1);
        assert_eq!(dir.activity("u1").map(|a| a.kind), Some(ActivityType::Queueing));

        assert!(!dir.reset_activity_if("u1", ActivityType::Solo));
        dir.remove(&s2);
        assert!(dir.activity("u1").is_none());
    }
}
