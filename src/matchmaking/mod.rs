//! Ranked Matchmaking
//!
//! Pairs queued users by widening trophy ranges, precomputes trophy deltas,
//! and hands finished pairings to the room registry. Users who abort too
//! often are suspended from the queue.

pub mod abort;
pub mod elo;
pub mod queue;

use std::time::Duration;

use crate::core::{env_millis, env_parse};

pub use abort::{AbortCounter, AbortOutcome};
pub use elo::{calculate_trophy_delta, start_level_for_trophies, MatchResult, RatedPlayer, TrophyDelta};
pub use queue::{can_match, QueueError, QueueUser, RankedQueue};

/// Trophy range allowed after a given time in queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideningStep {
    /// Applies while queue time is below this.
    pub below: Duration,
    /// Allowed trophy difference.
    pub range: i32,
}

/// Matchmaking configuration.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// How often pairing runs.
    pub tick_interval: Duration,
    /// Nobody is paired before this long in queue.
    pub min_queue_time: Duration,
    /// Ordered widening schedule. Past the last step the range is unbounded.
    pub widening: Vec<WideningStep>,
    /// Queue time before a bot becomes an acceptable opponent.
    pub bot_wait: Duration,
    /// Same pair not rematched within this long of queue time.
    pub rematch_ceiling: Duration,
    /// Delay between FOUND_OPPONENT and room creation.
    pub match_start_delay: Duration,
    /// Window aborts are counted in.
    pub abort_window: Duration,
    /// Abort count that triggers a warning.
    pub abort_warn_threshold: usize,
    /// Abort count that triggers a suspension.
    pub abort_suspend_threshold: usize,
    /// Suspension length.
    pub suspension: Duration,
    /// Best score required to join ranked.
    pub unlock_score: u32,
    /// Level cap for ranked rooms.
    pub level_cap: u8,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            min_queue_time: Duration::from_secs(1),
            widening: vec![
                WideningStep { below: Duration::from_secs(2), range: 100 },
                WideningStep { below: Duration::from_secs(5), range: 200 },
                WideningStep { below: Duration::from_secs(10), range: 400 },
                WideningStep { below: Duration::from_secs(20), range: 600 },
            ],
            bot_wait: Duration::from_secs(15),
            rematch_ceiling: Duration::from_secs(20),
            match_start_delay: Duration::from_secs(13),
            abort_window: Duration::from_secs(600),
            abort_warn_threshold: 3,
            abort_suspend_threshold: 5,
            suspension: Duration::from_secs(30 * 60),
            unlock_score: 50_000,
            level_cap: 39,
        }
    }
}

impl MatchmakingConfig {
    /// Defaults overridden by `MATCHMAKING_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            tick_interval: env_millis("MATCHMAKING_TICK_MS").unwrap_or(d.tick_interval),
            min_queue_time: env_millis("MATCHMAKING_MIN_QUEUE_MS").unwrap_or(d.min_queue_time),
            widening: d.widening,
            bot_wait: env_millis("MATCHMAKING_BOT_WAIT_MS").unwrap_or(d.bot_wait),
            rematch_ceiling: env_millis("MATCHMAKING_REMATCH_CEILING_MS")
                .unwrap_or(d.rematch_ceiling),
            match_start_delay: env_millis("MATCHMAKING_START_DELAY_MS")
                .unwrap_or(d.match_start_delay),
            abort_window: env_millis("MATCHMAKING_ABORT_WINDOW_MS").unwrap_or(d.abort_window),
            abort_warn_threshold: env_parse("MATCHMAKING_ABORT_WARN")
                .unwrap_or(d.abort_warn_threshold),
            abort_suspend_threshold: env_parse("MATCHMAKING_ABORT_SUSPEND")
                .unwrap_or(d.abort_suspend_threshold),
            suspension: env_millis("MATCHMAKING_SUSPENSION_MS").unwrap_or(d.suspension),
            unlock_score: env_parse("MATCHMAKING_UNLOCK_SCORE").unwrap_or(d.unlock_score),
            level_cap: env_parse("MATCHMAKING_LEVEL_CAP").unwrap_or(d.level_cap),
        }
    }

    /// Allowed trophy difference after `elapsed` in queue, `None` if unbounded.
    pub fn trophy_range(&self, elapsed: Duration) -> Option<i32> {
        self.widening
            .iter()
            .find(|step| elapsed < step.below)
            .map(|step| step.range)
    }

    /// Bot wait for a user. Newcomers with fewer than two matches skip it.
    pub fn bot_wait_for(&self, matches_played: u32) -> Duration {
        if matches_played < 2 {
            Duration::ZERO
        } else {
            self.bot_wait
        }
    }
}
