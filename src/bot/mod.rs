//! Bots
//!
//! Bots are ordinary sessions of the server: they register in the session
//! directory, send the same control messages and binary frames a browser
//! would, and learn what happens from the messages the server pushes back.
//!
//! ```text
//!   BotManager ── RankedBotUser ── BotSession ── ServerContext
//!                      │
//!                      ├── Emulator + GameStreamEmitter  (what it plays)
//!                      ├── PlacementAi ── Evaluator      (what it decides)
//!                      └── PacketBatcher                 (how it sends)
//! ```

pub mod batcher;
pub mod evaluator;
pub mod manager;
pub mod placement_ai;
pub mod ranked_bot;
pub mod session;

use std::time::Duration;

use thiserror::Error;

use crate::core::{env_flag, env_millis, env_parse};
use crate::matchmaking::QueueError;
use crate::tetris::SeedError;

pub use batcher::PacketBatcher;
pub use evaluator::{CandidatePlacement, EvaluationError, EvaluationRequest, Evaluator, HeuristicEvaluator};
pub use manager::{BotManager, BotTier, DEFAULT_ROSTER};
pub use placement_ai::{AiConfig, AiPlacement, InputSpeed, PlacementAi, ShiftMap};
pub use ranked_bot::RankedBotUser;
pub use session::{BotSession, RoomView};

/// Bot pacing.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Run bots at all.
    pub enabled: bool,
    /// Delay before a bot first connects.
    pub warmup: (Duration, Duration),
    /// Delay before each queue attempt.
    pub pre_queue: (Duration, Duration),
    /// Give up on the queue after this long.
    pub find_match_timeout: Duration,
    /// Length of a disconnect break.
    pub break_length: (Duration, Duration),
    /// Chance of a break after a match.
    pub break_chance: f64,
    /// Chance of a chat line before and after a game.
    pub chat_chance: f64,
    /// Pause after the room opens, before any chat.
    pub greeting_delay: (Duration, Duration),
    /// Pause before sending READY.
    pub ready_delay: (Duration, Duration),
    /// Pause after the match, before any chat.
    pub farewell_delay: (Duration, Duration),
    /// Pause before leaving a finished room.
    pub leave_delay: (Duration, Duration),
    /// How long the bot keeps playing once the outcome is settled.
    pub mullen: (Duration, Duration),
    /// Binary frame cadence.
    pub flush_interval: Duration,
    /// Sleep between catch-up iterations of the frame loop.
    pub frame_loop_sleep: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warmup: (Duration::from_secs(5), Duration::from_secs(1000)),
            pre_queue: (Duration::from_secs(5), Duration::from_secs(30)),
            find_match_timeout: Duration::from_secs(60),
            break_length: (Duration::from_secs(100), Duration::from_secs(1000)),
            break_chance: 0.5,
            chat_chance: 0.2,
            greeting_delay: (Duration::from_secs(1), Duration::from_secs(2)),
            ready_delay: (Duration::from_secs(2), Duration::from_secs(5)),
            farewell_delay: (Duration::from_secs(2), Duration::from_secs(4)),
            leave_delay: (Duration::from_secs(1), Duration::from_secs(10)),
            mullen: (Duration::from_secs(1), Duration::from_secs(10)),
            flush_interval: batcher::DEFAULT_FLUSH_INTERVAL,
            frame_loop_sleep: Duration::from_millis(10),
        }
    }
}

impl BotConfig {
    /// Defaults overridden by `BOT_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        let range = |min: &str, max: &str, default: (Duration, Duration)| {
            (
                env_millis(min).unwrap_or(default.0),
                env_millis(max).unwrap_or(default.1),
            )
        };
        Self {
            enabled: env_flag("BOTS_ENABLED").unwrap_or(d.enabled),
            warmup: range("BOT_WARMUP_MIN_MS", "BOT_WARMUP_MAX_MS", d.warmup),
            pre_queue: range("BOT_PRE_QUEUE_MIN_MS", "BOT_PRE_QUEUE_MAX_MS", d.pre_queue),
            find_match_timeout: env_millis("BOT_FIND_MATCH_TIMEOUT_MS")
                .unwrap_or(d.find_match_timeout),
            break_length: range("BOT_BREAK_MIN_MS", "BOT_BREAK_MAX_MS", d.break_length),
            break_chance: env_parse("BOT_BREAK_CHANCE").unwrap_or(d.break_chance),
            chat_chance: env_parse("BOT_CHAT_CHANCE").unwrap_or(d.chat_chance),
            greeting_delay: d.greeting_delay,
            ready_delay: range("BOT_READY_MIN_MS", "BOT_READY_MAX_MS", d.ready_delay),
            farewell_delay: d.farewell_delay,
            leave_delay: range("BOT_LEAVE_MIN_MS", "BOT_LEAVE_MAX_MS", d.leave_delay),
            mullen: d.mullen,
            flush_interval: env_millis("BOT_FLUSH_INTERVAL_MS").unwrap_or(d.flush_interval),
            frame_loop_sleep: d.frame_loop_sleep,
        }
    }
}

/// Bot errors. None of them escape the bot's own task.
#[derive(Debug, Error)]
pub enum BotError {
    /// The bot is not connected.
    #[error("Bot is not connected")]
    NotConnected,

    /// The room went away under the bot.
    #[error("Left room early")]
    LeftRoomEarly,

    /// The opponent left before the first game.
    #[error("Match aborted")]
    MatchAborted,

    /// The room is not a multiplayer room, or the bot is not a player in it.
    #[error("Unexpected room: {0}")]
    UnexpectedRoom(String),

    /// Queue join refused.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Room seed could not be used.
    #[error("Bad seed: {0}")]
    Seed(#[from] SeedError),

    /// Evaluation failed.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
}
