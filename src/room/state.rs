//! Room state values and the holder that broadcasts them.
//!
//! Every room type has one state struct. The whole struct is replaced on
//! each mutation and every replacement is pushed to the room's audience, in
//! mutation order, before `set` returns.

use serde::{Deserialize, Serialize};

use crate::matchmaking::elo::TrophyDelta;
use crate::network::session::SessionId;
use crate::user::{RecentGame, UserId};

/// Room identifier.
pub type RoomId = String;

// =============================================================================
// STATE HOLDER
// =============================================================================

/// Callback run synchronously on every `set`.
pub type StateListener<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Current value plus a list of listeners.
pub struct StateHolder<T> {
    value: T,
    listeners: Vec<StateListener<T>>,
}

impl<T: Clone> StateHolder<T> {
    /// Holder with an initial value and no listeners.
    pub fn new(value: T) -> Self {
        Self {
            value,
            listeners: Vec::new(),
        }
    }

    /// Current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replace the value and notify every listener.
    pub fn set(&mut self, value: T) {
        self.value = value;
        for listener in &self.listeners {
            listener(&self.value);
        }
    }

    /// Clone, modify, then `set`.
    pub fn update(&mut self, f: impl FnOnce(&mut T)) {
        let mut next = self.value.clone();
        f(&mut next);
        self.set(next);
    }

    /// Register a listener.
    pub fn subscribe(&mut self, listener: impl Fn(&T) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateHolder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHolder")
            .field("value", &self.value)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// =============================================================================
// SHARED
// =============================================================================

/// Kind of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    /// One player, free play.
    Solo,
    /// Two players, best-of points.
    Multiplayer,
    /// One player against the puzzle clock.
    PuzzleRush,
    /// Several players racing the same puzzle set.
    PuzzleBattles,
}

/// Summary sent with IN_ROOM_STATUS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// Room id.
    pub id: RoomId,
    /// Room kind.
    pub room_type: RoomType,
    /// Fixed players, in slot order.
    pub players: Vec<RoomPlayerInfo>,
}

/// Public identity of a fixed player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayerInfo {
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
}

/// Tagged union of all room states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    /// Solo room.
    Solo(SoloRoomState),
    /// Multiplayer (casual or ranked) room.
    Multiplayer(MultiplayerRoomState),
    /// Puzzle rush or puzzle battle room.
    PuzzleRush(PuzzleRushRoomState),
}

// =============================================================================
// SOLO
// =============================================================================

/// Solo room state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoloRoomState {
    /// True while the server sees a game in progress.
    pub server_in_game: bool,
    /// Most recent solo games, newest first.
    pub previous_games: Vec<RecentGame>,
    /// Summary of the game that just ended.
    pub last_game_summary: Option<SoloGameSummary>,
}

/// Post-game summary for the solo screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoloGameSummary {
    /// Game id.
    pub game_id: String,
    /// Final score.
    pub score: u32,
    /// True if this beat the previous best.
    pub is_personal_best: bool,
    /// Lines cleared.
    pub lines_cleared: u16,
    /// Four-line clears.
    pub tetris_count: u16,
    /// Average placement accuracy, if the client reported evaluations.
    pub accuracy: Option<f64>,
}

// =============================================================================
// MULTIPLAYER
// =============================================================================

/// One of the two fixed multiplayer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerSlot {
    /// First slot.
    #[serde(rename = "PLAYER_1")]
    Player1,
    /// Second slot.
    #[serde(rename = "PLAYER_2")]
    Player2,
}

impl PlayerSlot {
    /// Both slots in order.
    pub const BOTH: [PlayerSlot; 2] = [PlayerSlot::Player1, PlayerSlot::Player2];

    /// 0 or 1.
    pub fn index(self) -> usize {
        match self {
            PlayerSlot::Player1 => 0,
            PlayerSlot::Player2 => 1,
        }
    }

    /// Slot for an index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PlayerSlot::Player1),
            1 => Some(PlayerSlot::Player2),
            _ => None,
        }
    }

    /// The other slot.
    pub fn other(self) -> Self {
        match self {
            PlayerSlot::Player1 => PlayerSlot::Player2,
            PlayerSlot::Player2 => PlayerSlot::Player1,
        }
    }
}

/// Winner of a point or match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointWinner {
    /// First slot won.
    #[serde(rename = "PLAYER_1")]
    Player1,
    /// Second slot won.
    #[serde(rename = "PLAYER_2")]
    Player2,
    /// Tie.
    #[serde(rename = "DRAW")]
    Draw,
}

impl From<PlayerSlot> for PointWinner {
    fn from(slot: PlayerSlot) -> Self {
        match slot {
            PlayerSlot::Player1 => PointWinner::Player1,
            PlayerSlot::Player2 => PointWinner::Player2,
        }
    }
}

/// Multiplayer room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MultiplayerRoomStatus {
    /// Waiting for both players to ready up.
    BeforeGame,
    /// A point is being played.
    InGame,
    /// Match decided.
    AfterMatch,
    /// A player left before the first point.
    Aborted,
}

/// Per-slot player info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplayerPlayerInfo {
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
    /// Session playing this slot.
    pub session_id: SessionId,
    /// Trophies at room creation.
    pub trophies: i32,
    /// Highest trophies at room creation.
    pub highest_trophies: i32,
    /// Best score at room creation.
    pub highscore: u32,
    /// True once the player left the room.
    pub left_room: bool,
    /// Precomputed trophy change (ranked only).
    pub trophy_delta: Option<TrophyDelta>,
}

/// Result of one player's game within a point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointGame {
    /// Game id.
    pub game_id: String,
    /// Final score.
    pub score: u32,
}

/// A completed point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPoint {
    /// Piece-sequence seed both players used.
    pub seed: String,
    /// Who won the point.
    pub winner: PointWinner,
    /// Both games, in slot order.
    pub game: [PointGame; 2],
}

/// Multiplayer room state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplayerRoomState {
    /// Level every point starts on.
    pub start_level: u8,
    /// Ranked match.
    pub ranked: bool,
    /// Games stop when this level is reached.
    pub level_cap: u8,
    /// Points needed to win the match.
    pub winning_score: f64,
    /// Ranked match id.
    pub match_id: Option<String>,
    /// Both players, in slot order.
    pub players: [MultiplayerPlayerInfo; 2],
    /// Completed points.
    pub points: Vec<MatchPoint>,
    /// Seed for the next or current point.
    pub current_seed: String,
    /// Winner of the last point.
    pub last_game_winner: Option<PointWinner>,
    /// Winner of the match.
    pub match_winner: Option<PointWinner>,
    /// First player to leave or abort.
    pub aborter: Option<PlayerSlot>,
    /// True when the match ended because a player left.
    pub won_by_resignation: bool,
    /// Ready flags, in slot order.
    pub ready: [bool; 2],
    /// Status.
    pub status: MultiplayerRoomStatus,
}

impl MultiplayerRoomState {
    /// Points won by each slot (draws count half).
    pub fn point_totals(&self) -> [f64; 2] {
        let mut totals = [0.0, 0.0];
        for point in &self.points {
            match point.winner {
                PointWinner::Player1 => totals[0] += 1.0,
                PointWinner::Player2 => totals[1] += 1.0,
                PointWinner::Draw => {
                    totals[0] += 0.5;
                    totals[1] += 0.5;
                }
            }
        }
        totals
    }

    /// Slot whose session is `session_id`.
    pub fn slot_of_session(&self, session_id: &str) -> Option<PlayerSlot> {
        PlayerSlot::BOTH
            .into_iter()
            .find(|slot| self.players[slot.index()].session_id == session_id)
    }
}

// =============================================================================
// PUZZLE RUSH
// =============================================================================

/// Puzzle room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PuzzleRushStatus {
    /// Waiting for everyone to ready up.
    BeforeGame,
    /// Clock running.
    DuringGame,
    /// Everyone finished.
    AfterGame,
    /// A player left before the start.
    Aborted,
}

/// Per-player puzzle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PuzzlePlayerStatus {
    /// Not ready yet.
    NotReady,
    /// Ready.
    Ready,
    /// Out of strikes, out of time, or left.
    Ended,
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PuzzleProgress {
    /// Solved.
    Correct,
    /// Missed.
    Incorrect,
}

/// Label/value line on the post-game screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostGameStat {
    /// Label.
    pub label: String,
    /// Formatted value.
    pub value: String,
}

/// One logged attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleAttemptRecord {
    /// Who attempted.
    pub userid: UserId,
    /// Puzzle id.
    pub puzzle_id: String,
    /// First placement submitted.
    pub current: Option<u32>,
    /// Second placement submitted.
    pub next: Option<u32>,
    /// Whether it was correct.
    pub correct: bool,
}

/// Per-player puzzle info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleRushPlayer {
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
    /// Session in the room.
    pub session_id: SessionId,
    /// Highest trophies.
    pub highest_trophies: i32,
    /// Puzzle rating.
    pub puzzle_elo: i32,
    /// Precomputed trophy change (rated battles).
    pub trophy_delta: Option<TrophyDelta>,
    /// Attempt outcomes in order.
    pub progress: Vec<PuzzleProgress>,
    /// Puzzle currently shown.
    pub current_puzzle_id: String,
    /// Status.
    pub status: PuzzlePlayerStatus,
    /// Pieces per second, set when the player ends.
    pub pps: Option<f64>,
    /// Post-game stats.
    pub stats: Vec<PostGameStat>,
}

impl PuzzleRushPlayer {
    /// Number of correct attempts.
    pub fn score(&self) -> u32 {
        self.progress
            .iter()
            .filter(|p| **p == PuzzleProgress::Correct)
            .count() as u32
    }

    /// Number of incorrect attempts.
    pub fn strikes(&self) -> u32 {
        self.progress
            .iter()
            .filter(|p| **p == PuzzleProgress::Incorrect)
            .count() as u32
    }
}

/// Puzzle rush / battle room state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleRushRoomState {
    /// Battle between several players.
    pub battle: bool,
    /// Rated battle.
    pub rated: bool,
    /// Clock length.
    pub duration_seconds: u32,
    /// Incorrect attempts allowed.
    pub strikes: u32,
    /// Status.
    pub status: PuzzleRushStatus,
    /// Players.
    pub players: Vec<PuzzleRushPlayer>,
    /// Unix milliseconds when the clock started.
    pub start_time: Option<i64>,
    /// Puzzle set key, revealed after the game.
    pub puzzle_set: Option<String>,
    /// Attempt log, revealed after the game.
    pub attempts: Option<Vec<PuzzleAttemptRecord>>,
}
