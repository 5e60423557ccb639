//! Puzzle rush (one player) and puzzle battles (several players).
//!
//! Everyone plays the same ordered puzzle set against the clock. A player is
//! out after the allowed number of misses, on timeout, or on leaving. Once
//! every player is out the set, the attempt log and per-player stats are
//! revealed and results are persisted in the background.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::lifecycle::{RoomBehavior, RoomCore, RoomTimer, SessionRef};
use super::puzzle::PuzzleSet;
use super::state::{
    PostGameStat, PuzzleAttemptRecord, PuzzlePlayerStatus, PuzzleProgress, PuzzleRushPlayer,
    PuzzleRushRoomState, PuzzleRushStatus, RoomState, StateHolder,
};
use super::RoomError;
use crate::matchmaking::elo::{MatchResult, TrophyDelta};
use crate::network::protocol::{ClientRoomEvent, NotificationType, ServerMessage};
use crate::network::session::ActivityType;
use crate::user::UserEvent;

/// Extra time past the clock before the server ends stragglers itself.
const CLOCK_GRACE: Duration = Duration::from_secs(5);

/// XP for a puzzle rush score: `ceil(2 * (score / 5)^2)`.
pub fn puzzle_rush_xp(score: u32) -> u32 {
    (2.0 * (f64::from(score) / 5.0).powi(2)).ceil() as u32
}

/// Puzzle rush / battle strategy.
pub struct PuzzleRushRoom {
    rated: bool,
    deltas: Option<Vec<TrophyDelta>>,
    state: StateHolder<PuzzleRushRoomState>,
    puzzles: Option<PuzzleSet>,
    piece_counts: Vec<u32>,
    records: Vec<u32>,
    attempts: Vec<PuzzleAttemptRecord>,
    started_at: Option<Instant>,
    round: u32,
}

impl PuzzleRushRoom {
    /// Unrated rush or battle.
    pub fn new() -> Self {
        Self::with_rating(false, None)
    }

    /// Rated battle with precomputed trophy deltas in player order.
    pub fn rated(deltas: Vec<TrophyDelta>) -> Self {
        Self::with_rating(true, Some(deltas))
    }

    fn with_rating(rated: bool, deltas: Option<Vec<TrophyDelta>>) -> Self {
        Self {
            rated,
            deltas,
            state: StateHolder::new(PuzzleRushRoomState {
                battle: false,
                rated,
                duration_seconds: 0,
                strikes: 0,
                status: PuzzleRushStatus::BeforeGame,
                players: Vec::new(),
                start_time: None,
                puzzle_set: None,
                attempts: None,
            }),
            puzzles: None,
            piece_counts: Vec::new(),
            records: Vec::new(),
            attempts: Vec::new(),
            started_at: None,
            round: 0,
        }
    }

    /// Current typed state.
    pub fn typed_state(&self) -> &PuzzleRushRoomState {
        self.state.get()
    }

    async fn fresh_state(&mut self, core: &RoomCore) -> Result<PuzzleRushRoomState, RoomError> {
        let services = core.services();
        let userids: Vec<String> = core.players().iter().map(|p| p.userid.clone()).collect();
        let set = services.puzzles.puzzle_set(&userids).await?;
        let first_id = set.get(0).map(|p| p.id.clone()).unwrap_or_default();

        let mut players = Vec::with_capacity(userids.len());
        self.records.clear();
        for (i, player) in core.players().iter().enumerate() {
            let record = services.users.get(&player.userid).await?;
            self.records.push(record.puzzle_rush_best);
            players.push(PuzzleRushPlayer {
                userid: record.userid,
                username: player.username.clone(),
                session_id: player.session_id.clone(),
                highest_trophies: record.highest_trophies.max(0),
                puzzle_elo: record.puzzle_elo,
                trophy_delta: self.deltas.as_ref().and_then(|d| d.get(i).copied()),
                progress: Vec::new(),
                current_puzzle_id: first_id.clone(),
                status: PuzzlePlayerStatus::NotReady,
                pps: None,
                stats: Vec::new(),
            });
        }

        self.piece_counts = vec![0; players.len()];
        self.attempts.clear();
        self.started_at = None;
        self.puzzles = Some(set);
        self.round += 1;

        let config = core.config();
        Ok(PuzzleRushRoomState {
            battle: players.len() > 1,
            rated: self.rated,
            duration_seconds: config.puzzle_rush_seconds,
            strikes: config.puzzle_strikes,
            status: PuzzleRushStatus::BeforeGame,
            players,
            start_time: None,
            puzzle_set: None,
            attempts: None,
        })
    }

    fn on_ready(&mut self, core: &mut RoomCore, index: usize) {
        if self.state.get().status != PuzzleRushStatus::BeforeGame {
            return;
        }
        let mut state = self.state.get().clone();
        state.players[index].status = PuzzlePlayerStatus::Ready;
        if state
            .players
            .iter()
            .all(|p| p.status == PuzzlePlayerStatus::Ready)
        {
            state.status = PuzzleRushStatus::DuringGame;
            state.start_time = Some(Utc::now().timestamp_millis());
            self.started_at = Some(Instant::now());
            let clock = Duration::from_secs(u64::from(state.duration_seconds)) + CLOCK_GRACE;
            core.schedule(clock, RoomTimer::PuzzleClock(self.round));
            info!(room_id = %core.id(), players = state.players.len(), "Puzzle rush started");
        }
        self.state.set(state);
    }

    fn on_attempt(&mut self, core: &RoomCore, index: usize, current: Option<u32>, next: Option<u32>) {
        let state = self.state.get();
        if state.status != PuzzleRushStatus::DuringGame
            || state.players[index].status == PuzzlePlayerStatus::Ended
        {
            return;
        }
        let Some(set) = &self.puzzles else {
            return;
        };
        let puzzle_id = state.players[index].current_puzzle_id.clone();
        let Some(position) = set.puzzles.iter().position(|p| p.id == puzzle_id) else {
            return;
        };
        let correct = set.puzzles[position].is_correct(current, next);
        let next_id = set.get(position + 1).map(|p| p.id.clone());

        self.piece_counts[index] += u32::from(current.is_some()) + u32::from(next.is_some());
        self.attempts.push(PuzzleAttemptRecord {
            userid: state.players[index].userid.clone(),
            puzzle_id,
            current,
            next,
            correct,
        });

        let mut state = state.clone();
        let player = &mut state.players[index];
        player.progress.push(if correct {
            PuzzleProgress::Correct
        } else {
            PuzzleProgress::Incorrect
        });
        debug!(room_id = %core.id(), userid = %player.userid, correct, "Puzzle attempt");

        if player.strikes() >= state.strikes {
            self.state.set(state);
            self.set_ended(core, index);
        } else {
            if let Some(next_id) = next_id {
                player.current_puzzle_id = next_id;
            }
            self.state.set(state);
        }
    }

    fn set_ended(&mut self, core: &RoomCore, index: usize) {
        let mut state = self.state.get().clone();
        if state.status != PuzzleRushStatus::DuringGame
            || state.players[index].status == PuzzlePlayerStatus::Ended
        {
            return;
        }
        let seconds = self
            .started_at
            .map_or(0.0, |t| t.elapsed().as_secs_f64());
        let pieces = self.piece_counts[index];
        let player = &mut state.players[index];
        player.status = PuzzlePlayerStatus::Ended;
        player.pps = Some(if pieces == 0 || seconds <= 0.0 {
            0.0
        } else {
            f64::from(pieces) / seconds
        });

        if state
            .players
            .iter()
            .all(|p| p.status == PuzzlePlayerStatus::Ended)
        {
            self.on_match_end(core, state, seconds);
        } else {
            self.state.set(state);
        }
    }

    fn on_match_end(&mut self, core: &RoomCore, mut state: PuzzleRushRoomState, seconds: f64) {
        state.status = PuzzleRushStatus::AfterGame;
        state.puzzle_set = self.puzzles.as_ref().map(|s| s.key.clone());
        state.attempts = Some(self.attempts.clone());
        for (i, player) in state.players.iter_mut().enumerate() {
            player.stats = vec![
                PostGameStat {
                    label: "Lifetime record".into(),
                    value: self.records.get(i).copied().unwrap_or(0).to_string(),
                },
                PostGameStat {
                    label: "Pieces per second".into(),
                    value: format!("{:.2}/sec", player.pps.unwrap_or(0.0)),
                },
                PostGameStat {
                    label: "Puzzles attempted".into(),
                    value: player.progress.len().to_string(),
                },
            ];
        }
        self.state.set(state.clone());
        info!(room_id = %core.id(), "Puzzle rush ended");

        // Persist without holding up the room
        let users = std::sync::Arc::clone(&core.services().users);
        let directory = std::sync::Arc::clone(&core.services().directory);
        let room_id = core.id().to_string();
        let settlement = self.battle_results(&state);
        tokio::spawn(async move {
            for player in &state.players {
                let score = player.score();
                let event = UserEvent::PuzzleRush {
                    xp: puzzle_rush_xp(score),
                    score,
                    seconds: seconds.round() as u32,
                    pps: player.pps.unwrap_or(0.0),
                };
                if let Err(err) = users.alter(&player.userid, event).await {
                    error!(room_id = %room_id, userid = %player.userid, error = %err, "Failed to record puzzle rush");
                }
            }
            for (player, result, change) in settlement {
                directory.send_to_session(
                    &player.session_id,
                    ServerMessage::TrophyChange {
                        start_trophies: player.highest_trophies,
                        trophy_delta: change,
                    },
                );
                let event = UserEvent::RankedMatchEnd {
                    xp_gained: 0,
                    win: result == MatchResult::Win,
                    lose: result == MatchResult::Loss,
                    trophy_change: change,
                };
                if let Err(err) = users.alter(&player.userid, event).await {
                    error!(room_id = %room_id, userid = %player.userid, error = %err, "Failed to settle puzzle battle");
                }
            }
        });
    }

    /// Rated two-player battles: more solved puzzles wins.
    fn battle_results(&self, state: &PuzzleRushRoomState) -> Vec<(PuzzleRushPlayer, MatchResult, i32)> {
        if !self.rated || state.players.len() != 2 {
            return Vec::new();
        }
        let scores = [state.players[0].score(), state.players[1].score()];
        state
            .players
            .iter()
            .enumerate()
            .filter_map(|(i, player)| {
                let delta = player.trophy_delta?;
                let result = match scores[i].cmp(&scores[1 - i]) {
                    std::cmp::Ordering::Greater => MatchResult::Win,
                    std::cmp::Ordering::Less => MatchResult::Loss,
                    std::cmp::Ordering::Equal => MatchResult::Draw,
                };
                Some((player.clone(), result, delta.change_for(result)))
            })
            .collect()
    }

    fn index_of(&self, userid: &str) -> Option<usize> {
        self.state
            .get()
            .players
            .iter()
            .position(|p| p.userid == userid)
    }
}

impl Default for PuzzleRushRoom {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomBehavior for PuzzleRushRoom {
    async fn init_state(&mut self, core: &mut RoomCore) -> Result<(), RoomError> {
        if self.rated && core.players().len() < 2 {
            return Err(RoomError::InvalidEvent(
                "single player puzzle rush cannot be rated".into(),
            ));
        }
        let initial = self.fresh_state(core).await?;
        self.state.subscribe(core.broadcaster(RoomState::PuzzleRush));
        self.state.set(initial);
        Ok(())
    }

    fn state(&self) -> RoomState {
        RoomState::PuzzleRush(self.state.get().clone())
    }

    fn activity(&self) -> ActivityType {
        if self.state.get().battle {
            ActivityType::PuzzleBattles
        } else {
            ActivityType::PuzzleRush
        }
    }

    async fn on_client_event(
        &mut self,
        core: &mut RoomCore,
        sender: &SessionRef,
        _slot: Option<usize>,
        event: ClientRoomEvent,
    ) -> Result<(), RoomError> {
        let Some(index) = self.index_of(&sender.userid) else {
            return Err(RoomError::NotInRoom);
        };
        match event {
            ClientRoomEvent::Ready => self.on_ready(core, index),
            ClientRoomEvent::Attempt { current, next } => self.on_attempt(core, index, current, next),
            ClientRoomEvent::Timeout => self.set_ended(core, index),
            ClientRoomEvent::Rematch => {
                if self.state.get().status == PuzzleRushStatus::AfterGame {
                    let fresh = self.fresh_state(core).await?;
                    self.state.set(fresh);
                }
            }
            other => {
                return Err(RoomError::InvalidEvent(format!("{other:?} in puzzle room")));
            }
        }
        Ok(())
    }

    async fn on_binary(&mut self, core: &mut RoomCore, _slot: usize, _frame: &[u8]) {
        debug!(room_id = %core.id(), "Ignoring binary frame in puzzle room");
    }

    async fn on_player_leave(&mut self, core: &mut RoomCore, slot: usize) {
        let Some(player) = core.player(slot) else {
            return;
        };
        let Some(index) = self.index_of(&player.userid) else {
            return;
        };

        if self.state.get().status == PuzzleRushStatus::BeforeGame {
            let leaver = player.session_id.clone();
            for other in core.players().iter().filter(|p| !p.left && p.session_id != leaver) {
                core.send_to(
                    &other.session_id,
                    ServerMessage::notify(
                        NotificationType::Error,
                        "Puzzle Wars match was aborted by opponent!",
                    ),
                );
                core.send_to(&other.session_id, ServerMessage::go_to("/"));
            }
            self.state.update(|s| s.status = PuzzleRushStatus::Aborted);
            return;
        }
        self.set_ended(core, index);
    }

    async fn on_timer(&mut self, core: &mut RoomCore, timer: RoomTimer) {
        if let RoomTimer::PuzzleClock(round) = timer {
            if round != self.round {
                return;
            }
            for index in 0..self.state.get().players.len() {
                self.set_ended(core, index);
            }
        }
    }

    fn allows_spectators(&self) -> bool {
        false
    }

    fn on_spectator_join(&mut self, _core: &mut RoomCore, _session_id: &str) {}
}
