//! Protocol Messages
//!
//! JSON control messages exchanged over the WebSocket. Game streams travel
//! separately as binary frames (see [`crate::network::packet`]).

use serde::{Deserialize, Serialize};

use crate::matchmaking::elo::TrophyDelta;
use crate::room::state::{RoomInfo, RoomState};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Authenticate with the server. Must be the first message.
    Auth(AuthRequest),

    /// Enter the ranked queue.
    JoinRankedQueue {
        /// Which queue.
        #[serde(default)]
        queue_type: QueueType,
    },

    /// Leave the ranked queue (aborts a pending match).
    LeaveRankedQueue,

    /// Start a solo room.
    CreateSoloRoom,

    /// Start a puzzle rush room.
    CreatePuzzleRush,

    /// Spectate a room by id, or `"tv"` for the featured ranked match.
    SpectateRoom {
        /// Room id or `"tv"`.
        room_id: String,
    },

    /// Spectate whatever room a user is playing in.
    SpectateUser {
        /// Target user.
        userid: String,
    },

    /// Leave the current room.
    LeaveRoom,

    /// Room-specific event.
    ClientRoomEvent {
        /// The event.
        event: ClientRoomEvent,
    },

    /// Chat to everyone in the current room.
    Chat {
        /// Text.
        message: String,
    },

    /// Toggle bot opponents in the ranked queue.
    SetAllowBotOpponents {
        /// New value.
        allow: bool,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// JWT, or empty for a guest when auth is not required.
    pub token: String,
    /// Client version, informational.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Ranked queue flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueType {
    /// Head-to-head ranked games.
    #[default]
    Ranked,
    /// Rated puzzle battles.
    PuzzleBattle,
}

/// Events a client sends into its current room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientRoomEvent {
    /// Ready for the next point or the rematch.
    Ready,
    /// Abort the match without leaving the room.
    Abort,
    /// Ask for a recovery packet for a player slot.
    RequestRecovery {
        /// Slot index.
        player_index: u8,
    },
    /// Puzzle attempt. Placements use [`crate::room::puzzle::encode_placement`].
    Attempt {
        /// First placement, if made.
        current: Option<u32>,
        /// Second placement, if made.
        next: Option<u32>,
    },
    /// Puzzle clock ran out.
    Timeout,
    /// Play the puzzle rush again.
    Rematch,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionSuccessful {
        /// New session.
        session_id: String,
        /// Authenticated user.
        userid: String,
        /// Display name.
        username: String,
        /// Server version.
        server_version: String,
    },

    /// Error message.
    Error(ServerError),

    /// Where the session currently is.
    InRoomStatus {
        /// Player, spectator or nowhere.
        status: InRoomStatus,
        /// Room summary.
        room_info: Option<RoomInfo>,
        /// Full room state.
        room_state: Option<RoomState>,
    },

    /// Room state replaced.
    RoomStateUpdate {
        /// New state.
        state: RoomState,
    },

    /// Queue sizes.
    NumQueuingPlayers {
        /// Players in the ranked queue.
        count: usize,
        /// Players in the puzzle battle queue.
        battle_count: usize,
    },

    /// Matched, room follows after the start delay.
    FoundOpponent(FoundOpponentInfo),

    /// Toast notification.
    SendPushNotification {
        /// Severity.
        notification_type: NotificationType,
        /// Text.
        message: String,
    },

    /// Navigate the client.
    GoToPage {
        /// Route, e.g. `"/"`.
        route: String,
    },

    /// Trophies changed after a ranked match.
    TrophyChange {
        /// Trophies before the change.
        start_trophies: i32,
        /// Signed change.
        trophy_delta: i32,
    },

    /// Room chat.
    Chat {
        /// Sender.
        username: String,
        /// Text.
        message: String,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server unix milliseconds.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Session's relation to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InRoomStatus {
    /// Fixed player.
    Player,
    /// Spectator.
    Spectator,
    /// Not in a room.
    None,
}

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// Stats shown on the match-found screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Display name.
    pub username: String,
    /// Current trophies.
    pub trophies: i32,
    /// Highest trophies.
    pub highest_trophies: i32,
    /// Ranked matches played.
    pub matches_played: u32,
    /// Ranked wins.
    pub wins: u32,
    /// Ranked losses.
    pub losses: u32,
}

/// FOUND_OPPONENT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundOpponentInfo {
    /// Match id.
    pub match_id: String,
    /// Queue the match came from.
    pub queue_type: QueueType,
    /// Recipient's own stats.
    pub me: QueueStats,
    /// Opponent's stats.
    pub opponent: QueueStats,
    /// Recipient's precomputed trophy change.
    pub trophy_delta: TrophyDelta,
    /// Level the games start on.
    pub start_level: u8,
    /// Level games stop at.
    pub level_cap: u8,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Invalid input.
    InvalidInput,
    /// Session not registered.
    SessionNotFound,
    /// User busy elsewhere.
    UserUnavailable,
    /// User is suspended from the queue.
    Suspended,
    /// Ranked play not unlocked.
    RankedLocked,
    /// Room not found.
    RoomNotFound,
    /// Session not in a room.
    NotInRoom,
    /// Room type cannot be spectated.
    SpectatingDisabled,
    /// Room event not valid here.
    InvalidRoomEvent,
    /// Rate limited.
    RateLimited,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Error message shorthand.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }

    /// Push notification shorthand.
    pub fn notify(notification_type: NotificationType, message: impl Into<String>) -> Self {
        ServerMessage::SendPushNotification {
            notification_type,
            message: message.into(),
        }
    }

    /// Navigate shorthand.
    pub fn go_to(route: impl Into<String>) -> Self {
        ServerMessage::GoToPage {
            route: route.into(),
        }
    }

    /// IN_ROOM_STATUS with no room.
    pub fn not_in_room() -> Self {
        ServerMessage::InRoomStatus {
            status: InRoomStatus::None,
            room_info: None,
            room_state: None,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::state::SoloRoomState;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::ClientRoomEvent {
            event: ClientRoomEvent::Attempt {
                current: Some(1234),
                next: None,
            },
        };

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::ClientRoomEvent {
            event: ClientRoomEvent::Attempt { current, next },
        } = parsed
        {
            assert_eq!(current, Some(1234));
            assert_eq!(next, None);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_client_wire_names() {
        let msg = ClientMessage::from_json(r#"{"type":"join_ranked_queue"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRankedQueue {
                queue_type: QueueType::Ranked
            }
        );

        let msg = ClientMessage::from_json(
            r#"{"type":"join_ranked_queue","queueType":"PUZZLE_BATTLE"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRankedQueue {
                queue_type: QueueType::PuzzleBattle
            }
        );

        let msg = ClientMessage::from_json(
            r#"{"type":"client_room_event","event":{"type":"request_recovery","playerIndex":1}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ClientRoomEvent {
                event: ClientRoomEvent::RequestRecovery { player_index: 1 }
            }
        );

        let msg = ClientMessage::from_json(r#"{"type":"auth","token":"abc"}"#).unwrap();
        if let ClientMessage::Auth(auth) = msg {
            assert_eq!(auth.token, "abc");
            assert!(auth.client_version.is_none());
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let msg = ServerMessage::InRoomStatus {
            status: InRoomStatus::Spectator,
            room_info: None,
            room_state: Some(RoomState::Solo(SoloRoomState::default())),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"in_room_status\""));
        assert!(json.contains("\"spectator\""));
        let parsed = ServerMessage::from_json(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::AuthFailed, "Invalid token");
        let json = msg.to_json().unwrap();
        assert!(json.contains("auth_failed"));

        let msg = ServerMessage::error(ErrorCode::RankedLocked, "locked");
        assert!(msg.to_json().unwrap().contains("ranked_locked"));
    }

    #[test]
    fn test_queue_counts_shape() {
        let msg = ServerMessage::NumQueuingPlayers {
            count: 3,
            battle_count: 1,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"num_queuing_players\""));
        assert!(json.contains("\"battleCount\":1"));
    }
}
