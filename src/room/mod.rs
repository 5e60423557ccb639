//! Rooms
//!
//! A room owns a fixed list of players, a changing list of spectators, and a
//! typed state value broadcast to all of them on every change. Room kinds
//! differ only in their [`RoomBehavior`]: solo, multiplayer (optionally
//! ranked) and puzzle rush/battle.
//!
//! ```text
//!   RoomRegistry ── Arc<Mutex<Room>> ──┬── RoomCore  (players, audience, timers)
//!                                      └── RoomKind  (Solo | Multiplayer | PuzzleRush)
//!                                              └── GamePlayer per slot
//! ```

pub mod game_player;
pub mod lifecycle;
pub mod mirror;
pub mod multiplayer;
pub mod puzzle;
pub mod puzzle_rush;
pub mod ranked;
pub mod registry;
pub mod solo;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::{env_millis, env_parse};
use crate::matchmaking::AbortCounter;
use crate::network::protocol::ErrorCode;
use crate::network::session::{SessionDirectory, SessionId};
use crate::user::{StoreError, UserId, UserStore};

pub use game_player::{GameEvent, GamePlayer, ProtocolError};
pub use lifecycle::{Room, RoomBehavior, RoomCore, RoomKind, RoomTimer, SessionRef};
pub use mirror::{GameMirror, RecoveryRetry, RetryAction};
pub use puzzle::{GeneratedPuzzleSource, PuzzleError, PuzzleSet, PuzzleSource, RushPuzzle};
pub use registry::RoomRegistry;
pub use state::{PlayerSlot, RoomId, RoomInfo, RoomState, RoomType, StateHolder};

/// Room timing and limits.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Grace period between both players ready and the point starting.
    pub ready_delay: Duration,
    /// Delay before a rematch re-initialises the room.
    pub rematch_delay: Duration,
    /// Delay before a new spectator receives recovery packets.
    pub spectator_recovery_delay: Duration,
    /// Interval between recovery requests after a stream error.
    pub recovery_retry_interval: Duration,
    /// Recovery requests before giving up.
    pub recovery_retry_attempts: u32,
    /// Level cap for multiplayer rooms.
    pub default_level_cap: u8,
    /// Puzzle rush clock.
    pub puzzle_rush_seconds: u32,
    /// Incorrect puzzle attempts allowed.
    pub puzzle_strikes: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            ready_delay: Duration::from_millis(1000),
            rematch_delay: Duration::from_millis(500),
            spectator_recovery_delay: Duration::from_millis(100),
            recovery_retry_interval: Duration::from_millis(3000),
            recovery_retry_attempts: 3,
            default_level_cap: 39,
            puzzle_rush_seconds: 180,
            puzzle_strikes: 3,
        }
    }
}

impl RoomConfig {
    /// Defaults overridden by `ROOM_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ready_delay: env_millis("ROOM_READY_DELAY_MS").unwrap_or(d.ready_delay),
            rematch_delay: env_millis("ROOM_REMATCH_DELAY_MS").unwrap_or(d.rematch_delay),
            spectator_recovery_delay: env_millis("ROOM_SPECTATOR_RECOVERY_MS")
                .unwrap_or(d.spectator_recovery_delay),
            recovery_retry_interval: env_millis("ROOM_RECOVERY_RETRY_MS")
                .unwrap_or(d.recovery_retry_interval),
            recovery_retry_attempts: env_parse("ROOM_RECOVERY_RETRY_ATTEMPTS")
                .unwrap_or(d.recovery_retry_attempts),
            default_level_cap: env_parse("ROOM_LEVEL_CAP").unwrap_or(d.default_level_cap),
            puzzle_rush_seconds: env_parse("ROOM_PUZZLE_RUSH_SECONDS")
                .unwrap_or(d.puzzle_rush_seconds),
            puzzle_strikes: env_parse("ROOM_PUZZLE_STRIKES").unwrap_or(d.puzzle_strikes),
        }
    }
}

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// No room with that id.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Session is not in any room.
    #[error("Not in a room")]
    NotInRoom,

    /// Session is not registered.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Room type does not allow spectators.
    #[error("This room cannot be spectated")]
    SpectatingDisabled,

    /// Event not valid for the room or the sender.
    #[error("Invalid room event: {0}")]
    InvalidEvent(String),

    /// A player went offline before the room could be built.
    #[error("Room creation aborted: {userid} is offline")]
    Aborted {
        /// Offline user.
        userid: UserId,
        /// Their session.
        session_id: SessionId,
    },

    /// User store failure.
    #[error("User store error: {0}")]
    Store(#[from] StoreError),

    /// Puzzle source failure.
    #[error("Puzzle error: {0}")]
    Puzzle(#[from] PuzzleError),
}

impl RoomError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::NotInRoom => ErrorCode::NotInRoom,
            RoomError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            RoomError::SpectatingDisabled => ErrorCode::SpectatingDisabled,
            RoomError::InvalidEvent(_) => ErrorCode::InvalidRoomEvent,
            RoomError::Aborted { .. } => ErrorCode::UserUnavailable,
            RoomError::Store(_) | RoomError::Puzzle(_) => ErrorCode::InternalError,
        }
    }
}

/// Shared collaborators every room uses.
pub struct RoomServices {
    /// Session directory for sends and activity flags.
    pub directory: Arc<SessionDirectory>,
    /// User store.
    pub users: Arc<dyn UserStore>,
    /// Abort counter.
    pub aborts: Arc<AbortCounter>,
    /// Puzzle sets.
    pub puzzles: Arc<dyn PuzzleSource>,
    /// Timing.
    pub config: RoomConfig,
}
