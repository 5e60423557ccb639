//! Ranked Queue
//!
//! Users wait in join order. Every tick the queue is scanned for the first
//! matchable pair, the pair is removed, and the scan restarts until no pair
//! is left. A pairing stays revocable until its room exists: either side
//! leaving the queue in the meantime aborts it.
//!
//! ```text
//!   join ──► queue ──tick──► PendingMatch ──delay──► RoomRegistry::create_room
//!              ▲                   │
//!              └── leave ──────────┘ (abort)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::elo::{calculate_trophy_delta, start_level_for_trophies, RatedPlayer, TrophyDelta};
use super::MatchmakingConfig;
use crate::network::protocol::{
    ErrorCode, FoundOpponentInfo, NotificationType, QueueStats, QueueType, ServerMessage,
};
use crate::network::session::{ActivityType, SessionId};
use crate::room::lifecycle::{RoomKind, RoomPlayer};
use crate::room::multiplayer::{MultiplayerRoom, MultiplayerSetup};
use crate::room::puzzle_rush::PuzzleRushRoom;
use crate::room::ranked::{RankedSettlement, RANKED_WINNING_SCORE};
use crate::room::state::RoomType;
use crate::room::{RoomError, RoomRegistry};
use crate::user::{StoreError, UserId, UserRecord};

/// Queue errors. None of them leave the queue modified.
#[derive(Debug, Error)]
pub enum QueueError {
    /// User is busy elsewhere or queued from another session.
    #[error("User unavailable to join queue: {0}")]
    UserUnavailableToJoinQueue(String),

    /// Session is not registered.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Suspended for aborting. Carries the user-facing message.
    #[error("{0}")]
    Suspended(String),

    /// Ranked play not unlocked yet.
    #[error("Ranked mode is locked")]
    RankedLocked,

    /// User store failure.
    #[error("User store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::UserUnavailableToJoinQueue(_) => ErrorCode::UserUnavailable,
            QueueError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            QueueError::Suspended(_) => ErrorCode::Suspended,
            QueueError::RankedLocked => ErrorCode::RankedLocked,
            QueueError::Store(_) => ErrorCode::InternalError,
        }
    }
}

/// One queued user.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueUser {
    /// Queue joined.
    pub queue_type: QueueType,
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
    /// Session that joined.
    pub session_id: SessionId,
    /// Trophies when joining.
    pub trophies: i32,
    /// Highest trophies when joining.
    pub highest_trophies: i32,
    /// Ranked matches played.
    pub matches_played: u32,
    /// Willing to face bots.
    pub allow_bot_opponents: bool,
    /// Bot account.
    pub is_bot: bool,
    /// When the user joined.
    pub queue_start: Instant,
}

impl QueueUser {
    /// Queue entry for a stored user.
    pub fn from_record(
        record: &UserRecord,
        queue_type: QueueType,
        session_id: impl Into<SessionId>,
        queue_start: Instant,
    ) -> Self {
        Self {
            queue_type,
            userid: record.userid.clone(),
            username: record.username.clone(),
            session_id: session_id.into(),
            trophies: record.trophies.max(0),
            highest_trophies: record.highest_trophies,
            matches_played: record.matches_played,
            allow_bot_opponents: record.allow_bot_opponents,
            is_bot: record.is_bot,
            queue_start,
        }
    }

    /// Time in queue at `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.queue_start)
    }
}

fn within_range(config: &MatchmakingConfig, elapsed: Duration, diff: i32) -> bool {
    config.trophy_range(elapsed).map_or(true, |range| diff <= range)
}

/// True if `a` and `b` may be paired at `now`.
pub fn can_match(
    config: &MatchmakingConfig,
    a: &QueueUser,
    b: &QueueUser,
    previous_opponent: &HashMap<UserId, UserId>,
    now: Instant,
) -> bool {
    if a.userid == b.userid || a.queue_type != b.queue_type {
        return false;
    }
    if a.is_bot && b.is_bot {
        return false;
    }

    let (mut a_elapsed, mut b_elapsed) = (a.elapsed(now), b.elapsed(now));
    if a_elapsed < config.min_queue_time || b_elapsed < config.min_queue_time {
        return false;
    }

    if a.is_bot || b.is_bot {
        if !a.allow_bot_opponents || !b.allow_bot_opponents {
            return false;
        }
        let (human, human_elapsed) = if a.is_bot {
            (b, &mut b_elapsed)
        } else {
            (a, &mut a_elapsed)
        };
        let wait = config.bot_wait_for(human.matches_played);
        if *human_elapsed < wait {
            return false;
        }
        // The range starts widening once the bot wait is over
        *human_elapsed -= wait;
    }

    let diff = (a.trophies - b.trophies).abs();
    if !within_range(config, a_elapsed, diff) || !within_range(config, b_elapsed, diff) {
        return false;
    }

    let patient = a.elapsed(now) >= config.rematch_ceiling && b.elapsed(now) >= config.rematch_ceiling;
    if !patient {
        let rematch = previous_opponent.get(&a.userid) == Some(&b.userid)
            || previous_opponent.get(&b.userid) == Some(&a.userid);
        if rematch {
            return false;
        }
    }
    true
}

/// A pairing waiting for its room.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMatch {
    /// Match id.
    pub match_id: String,
    /// Both sides, in queue order.
    pub users: [QueueUser; 2],
}

#[derive(Default)]
struct QueueState {
    queue: Vec<QueueUser>,
    previous_opponent: HashMap<UserId, UserId>,
    // match id -> (userids, aborting userid)
    matches: HashMap<String, ([UserId; 2], Option<UserId>)>,
}

/// The ranked and puzzle-battle queue.
pub struct RankedQueue {
    config: MatchmakingConfig,
    registry: Arc<RoomRegistry>,
    state: Mutex<QueueState>,
}

impl RankedQueue {
    /// Empty queue creating rooms through `registry`.
    pub fn new(config: MatchmakingConfig, registry: Arc<RoomRegistry>) -> Self {
        Self {
            config,
            registry,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Matchmaking configuration.
    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    /// Queued users per queue type: (ranked, puzzle battle).
    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        let ranked = state
            .queue
            .iter()
            .filter(|u| u.queue_type == QueueType::Ranked)
            .count();
        (ranked, state.queue.len() - ranked)
    }

    /// True if the user is waiting in the queue.
    pub fn contains(&self, userid: &str) -> bool {
        self.lock().queue.iter().any(|u| u.userid == userid)
    }

    /// True if the user is in a pairing that has no room yet.
    pub fn is_matched(&self, userid: &str) -> bool {
        self.lock()
            .matches
            .values()
            .any(|(users, _)| users.iter().any(|u| u == userid))
    }

    /// Add a session's user to the queue.
    pub async fn join(&self, queue_type: QueueType, session_id: &str) -> Result<(), QueueError> {
        let services = self.registry.services();
        let directory = &services.directory;
        let userid = directory
            .userid_of(session_id)
            .ok_or_else(|| QueueError::SessionNotFound(session_id.to_string()))?;

        if let Some(existing) = self.queued_session(&userid) {
            if existing == session_id {
                return Ok(());
            }
            return Err(QueueError::UserUnavailableToJoinQueue(format!(
                "{userid} is already queued from another session"
            )));
        }
        if let Some(message) = services.aborts.suspended_message(&userid) {
            return Err(QueueError::Suspended(message));
        }
        if directory.activity(&userid).is_some() || self.is_matched(&userid) {
            return Err(QueueError::UserUnavailableToJoinQueue(format!(
                "{userid} is busy"
            )));
        }

        let record = services.users.get(&userid).await?;
        let locked = record.highest_score < self.config.unlock_score || record.trophies < 0;
        if queue_type == QueueType::Ranked && !record.is_bot && locked {
            return Err(QueueError::RankedLocked);
        }

        {
            let mut state = self.lock();
            // Re-check after the store lookup
            if state.queue.iter().any(|u| u.userid == userid) {
                return Err(QueueError::UserUnavailableToJoinQueue(format!(
                    "{userid} is already queued"
                )));
            }
            state.queue.push(QueueUser::from_record(
                &record,
                queue_type,
                session_id,
                Instant::now(),
            ));
        }
        directory.set_activity(&userid, ActivityType::Queueing, session_id);
        debug!(userid = %userid, queue_type = ?queue_type, "Joined queue");
        self.send_counts();
        Ok(())
    }

    fn queued_session(&self, userid: &str) -> Option<SessionId> {
        self.lock()
            .queue
            .iter()
            .find(|u| u.userid == userid)
            .map(|u| u.session_id.clone())
    }

    /// Remove a user, aborting any pairing still waiting for its room.
    /// Returns true if the user was queued or matched.
    pub async fn leave(&self, userid: &str) -> bool {
        let (removed, aborted) = {
            let mut state = self.lock();
            let mut aborted = false;
            for (users, aborted_by) in state.matches.values_mut() {
                if aborted_by.is_none() && users.iter().any(|u| u == userid) {
                    *aborted_by = Some(userid.to_string());
                    aborted = true;
                }
            }
            let before = state.queue.len();
            state.queue.retain(|u| u.userid != userid);
            (state.queue.len() != before, aborted)
        };

        let services = self.registry.services();
        if aborted {
            info!(userid = %userid, "Pending match aborted");
            services.aborts.on_abort(userid, None);
        }
        if removed {
            services
                .directory
                .reset_activity_if(userid, ActivityType::Queueing);
            self.send_counts();
        }
        removed || aborted
    }

    /// Leave the queue if `session_id` is the session that joined.
    pub async fn on_session_disconnect(&self, userid: &str, session_id: &str) {
        if self.queued_session(userid).as_deref() == Some(session_id) || self.is_matched(userid) {
            self.leave(userid).await;
        }
    }

    /// Pair everything matchable at `now`. Paired users leave the queue.
    pub fn find_matches_at(&self, now: Instant) -> Vec<PendingMatch> {
        let mut found = Vec::new();
        let mut state = self.lock();
        while let Some((i, j)) = Self::first_pair(&self.config, &state, now) {
            // j > i, so removing j first keeps i valid
            let second = state.queue.remove(j);
            let first = state.queue.remove(i);
            state
                .previous_opponent
                .insert(first.userid.clone(), second.userid.clone());
            state
                .previous_opponent
                .insert(second.userid.clone(), first.userid.clone());

            let match_id = uuid::Uuid::new_v4().to_string();
            state.matches.insert(
                match_id.clone(),
                ([first.userid.clone(), second.userid.clone()], None),
            );
            found.push(PendingMatch {
                match_id,
                users: [first, second],
            });
        }
        drop(state);
        if !found.is_empty() {
            self.send_counts();
        }
        found
    }

    fn first_pair(config: &MatchmakingConfig, state: &QueueState, now: Instant) -> Option<(usize, usize)> {
        let queue = &state.queue;
        (0..queue.len()).find_map(|i| {
            ((i + 1)..queue.len())
                .find(|&j| can_match(config, &queue[i], &queue[j], &state.previous_opponent, now))
                .map(|j| (i, j))
        })
    }

    /// Who aborted a pending match, if anyone.
    pub fn aborted_by(&self, match_id: &str) -> Option<UserId> {
        self.lock()
            .matches
            .get(match_id)
            .and_then(|(_, aborted_by)| aborted_by.clone())
    }

    /// Announce a pairing, wait the start delay, then build its room.
    pub async fn run_match(&self, pending: PendingMatch) {
        let result = self.start_match(&pending).await;
        let [a, b] = &pending.users;
        let directory = &self.registry.services().directory;

        if let Err(err) = result {
            warn!(match_id = %pending.match_id, error = %err, "Match did not start");
            if let RoomError::Aborted { userid, .. } = &err {
                let other = if *userid == a.userid { b } else { a };
                directory.send_to_session(
                    &other.session_id,
                    ServerMessage::notify(NotificationType::Error, "Match aborted by opponent"),
                );
            }
            for user in [a, b] {
                directory.reset_activity_if(&user.userid, ActivityType::Queueing);
                directory.send_to_session(&user.session_id, ServerMessage::go_to("/"));
            }
        }
        self.lock().matches.remove(&pending.match_id);
    }

    async fn start_match(&self, pending: &PendingMatch) -> Result<(), RoomError> {
        let services = self.registry.services();
        let [a, b] = &pending.users;
        let queue_type = a.queue_type;
        let record_a = services.users.get(&a.userid).await?;
        let record_b = services.users.get(&b.userid).await?;

        let rating = |record: &UserRecord| match queue_type {
            QueueType::Ranked => record.trophies.max(0),
            QueueType::PuzzleBattle => record.puzzle_elo,
        };
        let rated = |record: &UserRecord| RatedPlayer {
            trophies: rating(record),
            matches_played: record.matches_played,
            is_bot: record.is_bot,
        };
        let deltas: [TrophyDelta; 2] = [
            calculate_trophy_delta(rated(&record_a), rating(&record_b)),
            calculate_trophy_delta(rated(&record_b), rating(&record_a)),
        ];
        let start_level = start_level_for_trophies(record_a.trophies.min(record_b.trophies));
        let level_cap = self.config.level_cap;

        let stats = |record: &UserRecord| QueueStats {
            username: record.username.clone(),
            trophies: record.trophies.max(0),
            highest_trophies: record.highest_trophies,
            matches_played: record.matches_played,
            wins: record.wins,
            losses: record.losses,
        };
        for (i, (me, opponent)) in [(&record_a, &record_b), (&record_b, &record_a)]
            .into_iter()
            .enumerate()
        {
            services.directory.send_to_session(
                &pending.users[i].session_id,
                ServerMessage::FoundOpponent(FoundOpponentInfo {
                    match_id: pending.match_id.clone(),
                    queue_type,
                    me: stats(me),
                    opponent: stats(opponent),
                    trophy_delta: deltas[i],
                    start_level,
                    level_cap,
                }),
            );
        }
        info!(
            match_id = %pending.match_id,
            player1 = %a.userid,
            player2 = %b.userid,
            trophies1 = a.trophies,
            trophies2 = b.trophies,
            "Match found"
        );

        tokio::time::sleep(self.config.match_start_delay).await;

        for user in [a, b] {
            services
                .directory
                .reset_activity_if(&user.userid, ActivityType::Queueing);
        }
        if let Some(aborter) = self.aborted_by(&pending.match_id) {
            let session_id = if aborter == a.userid { &a.session_id } else { &b.session_id };
            return Err(RoomError::Aborted {
                userid: aborter,
                session_id: session_id.clone(),
            });
        }

        let players = vec![
            RoomPlayer::new(&a.userid, &a.username, &a.session_id),
            RoomPlayer::new(&b.userid, &b.username, &b.session_id),
        ];
        let (room_type, kind) = match queue_type {
            QueueType::Ranked => (
                RoomType::Multiplayer,
                RoomKind::Multiplayer(MultiplayerRoom::new(MultiplayerSetup {
                    start_level,
                    level_cap,
                    winning_score: RANKED_WINNING_SCORE,
                    ranked: Some(RankedSettlement::new(deltas)),
                })),
            ),
            QueueType::PuzzleBattle => (
                RoomType::PuzzleBattles,
                RoomKind::PuzzleRush(PuzzleRushRoom::rated(deltas.to_vec())),
            ),
        };
        self.registry.create_room(room_type, players, kind).await?;
        Ok(())
    }

    fn send_counts(&self) {
        let (count, battle_count) = self.counts();
        let sessions: Vec<SessionId> = self.lock().queue.iter().map(|u| u.session_id.clone()).collect();
        let directory = &self.registry.services().directory;
        for session_id in sessions {
            directory.send_to_session(
                &session_id,
                ServerMessage::NumQueuingPlayers { count, battle_count },
            );
        }
    }

    /// Tick loop: pair users every interval and start each match in its own
    /// task. Stops when `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for pending in self.find_matches_at(Instant::now()) {
                        let queue = Arc::clone(&self);
                        tokio::spawn(async move { queue.run_match(pending).await });
                    }
                }
                _ = shutdown.recv() => {
                    info!("Matchmaking stopped");
                    break;
                }
            }
        }
    }
}
