//! Packet-driven reconstruction of one player's game.
//!
//! The server never simulates gravity or input. A [`GamePlayer`] applies each
//! packet the client reports to a [`GameState`] and raises start/end events
//! the room turns into persistence and state updates.

use thiserror::Error;
use tracing::warn;

use crate::network::packet::{Opcode, Packet, PacketDisassembler, PacketError};
use crate::tetris::{GameRecovery, GameSnapshot, GameState, TetrominoType};
use crate::user::{StoreError, UserEvent, UserId, UserStore};

/// Packet stream errors. Never fatal to the room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame could not be decoded.
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    /// In-game packet without a running game.
    #[error("{0:?} received with no game in progress")]
    NoGameInProgress(Opcode),
}

/// A game began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStartEvent {
    /// Server-assigned game id.
    pub game_id: String,
    /// Start level.
    pub start_level: u8,
    /// First piece.
    pub current: TetrominoType,
    /// Preview piece.
    pub next: TetrominoType,
}

/// A game ended, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedGame {
    /// Game id.
    pub game_id: String,
    /// Final state.
    pub snapshot: GameSnapshot,
    /// Ended by the server rather than by an END packet.
    pub forced: bool,
    /// Average placement accuracy, if evaluations were reported.
    pub accuracy: Option<f64>,
}

/// A game ended and was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEndEvent {
    /// Game id.
    pub game_id: String,
    /// Final state.
    pub snapshot: GameSnapshot,
    /// Ended by the server rather than by an END packet.
    pub forced: bool,
    /// XP awarded.
    pub xp_gained: u32,
    /// Score beat the previous best.
    pub is_personal_best: bool,
    /// Average placement accuracy.
    pub accuracy: Option<f64>,
}

/// Event raised while applying packets.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// START applied.
    Started(GameStartEvent),
    /// END applied, or a game was forced to end.
    Ended(FinishedGame),
}

/// Result of applying a whole frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameOutcome {
    /// Events in packet order.
    pub events: Vec<GameEvent>,
    /// First error; packets after it were not applied.
    pub error: Option<ProtocolError>,
}

/// XP awarded per game, by room type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpStrategy {
    /// `round((score / 20000) ^ 1.6)`.
    Solo,
    /// No XP.
    None,
}

impl XpStrategy {
    /// XP for a finished game.
    pub fn xp_for(self, snapshot: &GameSnapshot) -> u32 {
        match self {
            XpStrategy::Solo => (f64::from(snapshot.score) / 20_000.0).powf(1.6).round() as u32,
            XpStrategy::None => 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Accuracy {
    total: f64,
    count: u32,
}

impl Accuracy {
    fn record(&mut self, best: f32, player: f32) {
        let loss = f64::from(best - player).max(0.0);
        self.total += (100.0 - 5.0 * loss).clamp(0.0, 100.0);
        self.count += 1;
    }

    fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / f64::from(self.count))
    }
}

/// One player's reconstructed game.
#[derive(Debug, Clone)]
pub struct GamePlayer {
    userid: UserId,
    state: Option<GameState>,
    game_id: Option<String>,
    last_snapshot: Option<GameSnapshot>,
    topout_score: Option<u32>,
    accuracy: Accuracy,
}

impl GamePlayer {
    /// Player with no game running.
    pub fn new(userid: impl Into<UserId>) -> Self {
        Self {
            userid: userid.into(),
            state: None,
            game_id: None,
            last_snapshot: None,
            topout_score: None,
            accuracy: Accuracy::default(),
        }
    }

    /// Owning user.
    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// True while a game is running.
    pub fn is_in_game(&self) -> bool {
        self.state.is_some()
    }

    /// Live state.
    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    /// Id of the running game.
    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    /// Final score of the last game, cleared when a new one starts.
    pub fn topout_score(&self) -> Option<u32> {
        self.topout_score
    }

    /// Snapshot of the last finished game.
    pub fn last_snapshot(&self) -> Option<&GameSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Apply every packet of a frame, stopping at the first error.
    pub fn handle_frame(&mut self, frame: &[u8]) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        for packet in PacketDisassembler::new(frame) {
            let result = packet
                .map_err(ProtocolError::from)
                .and_then(|p| self.handle_packet(&p));
            match result {
                Ok(events) => outcome.events.extend(events),
                Err(err) => {
                    warn!(userid = %self.userid, error = %err, "Invalid game packet");
                    outcome.error = Some(err);
                    break;
                }
            }
        }
        outcome
    }

    /// Apply one packet.
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<Vec<GameEvent>, ProtocolError> {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(userid = %self.userid, opcode = ?packet.opcode(), "Applying packet");

        let mut events = Vec::new();
        match packet {
            Packet::GameStart {
                level,
                current,
                next,
            } => {
                // A START mid-game means the client restarted without END
                if let Some(ended) = self.finish(true) {
                    events.push(GameEvent::Ended(ended));
                }
                let game_id = uuid::Uuid::new_v4().to_string();
                self.state = Some(GameState::new(*level, *current, *next));
                self.game_id = Some(game_id.clone());
                self.topout_score = None;
                self.accuracy = Accuracy::default();
                events.push(GameEvent::Started(GameStartEvent {
                    game_id,
                    start_level: *level,
                    current: *current,
                    next: *next,
                }));
            }
            Packet::Recovery(recovery) => {
                if recovery.is_not_in_game() {
                    self.last_snapshot = Some(GameState::from_recovery(recovery).snapshot());
                } else {
                    self.state = Some(GameState::from_recovery(recovery));
                    if self.game_id.is_none() {
                        self.game_id = Some(uuid::Uuid::new_v4().to_string());
                    }
                }
            }
            Packet::GameEnd => {
                if self.state.is_none() {
                    return Err(ProtocolError::NoGameInProgress(Opcode::GameEnd));
                }
                if let Some(ended) = self.finish(false) {
                    events.push(GameEvent::Ended(ended));
                }
            }
            Packet::Evaluation {
                best_eval,
                player_eval,
            } => {
                if self.state.is_none() {
                    return Err(ProtocolError::NoGameInProgress(Opcode::Evaluation));
                }
                self.accuracy.record(*best_eval, *player_eval);
            }
            other => {
                let state = self
                    .state
                    .as_mut()
                    .ok_or(ProtocolError::NoGameInProgress(other.opcode()))?;
                match other {
                    Packet::Countdown { countdown, .. } => state.on_countdown(*countdown),
                    Packet::Placement {
                        next_next,
                        pose,
                        pushdown,
                    } => {
                        state.on_placement(*next_next, *pose, *pushdown);
                    }
                    Packet::AbbrBoard { pose, .. } => state.on_abbr_board(*pose),
                    Packet::FullBoard { board, .. } => state.on_full_board(board.clone()),
                    Packet::FullState(full) => state.on_full_state(full),
                    _ => {}
                }
            }
        }
        Ok(events)
    }

    /// RECOVERY describing this player right now.
    pub fn recovery_packet(&self) -> Packet {
        let recovery = match &self.state {
            Some(state) => state.to_recovery(),
            None => GameRecovery::not_in_game(self.last_snapshot.as_ref()),
        };
        Packet::Recovery(Box::new(recovery))
    }

    /// End a running game because the player is going away.
    pub fn force_end(&mut self) -> Option<FinishedGame> {
        self.finish(true)
    }

    fn finish(&mut self, forced: bool) -> Option<FinishedGame> {
        let state = self.state.take()?;
        let snapshot = state.snapshot();
        self.topout_score = Some(snapshot.score);
        self.last_snapshot = Some(snapshot.clone());
        Some(FinishedGame {
            game_id: self
                .game_id
                .take()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            snapshot,
            forced,
            accuracy: self.accuracy.average(),
        })
    }
}

/// Persist a finished game and work out XP and personal best.
pub async fn record_game_end(
    users: &dyn UserStore,
    userid: &str,
    finished: FinishedGame,
    xp: XpStrategy,
    solo: bool,
) -> Result<GameEndEvent, StoreError> {
    let previous_best = users.get(userid).await?.highest_score;
    let xp_gained = xp.xp_for(&finished.snapshot);
    let snapshot = &finished.snapshot;
    let updated = users
        .alter(
            userid,
            UserEvent::GameEnd {
                game_id: finished.game_id.clone(),
                score: snapshot.score,
                level: snapshot.level,
                lines: snapshot.lines,
                tetris_count: snapshot.tetris_count,
                xp_gained,
                solo,
            },
        )
        .await?;
    let is_personal_best = snapshot.score > previous_best && updated.highest_score == snapshot.score;

    Ok(GameEndEvent {
        game_id: finished.game_id,
        snapshot: finished.snapshot,
        forced: finished.forced,
        xp_gained,
        is_personal_best,
        accuracy: finished.accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::emitter::GameStreamEmitter;
    use crate::network::packet::PacketAssembler;
    use crate::tetris::{Emulator, InputKey, KeyState, MtPose, COUNTDOWN_NOT_IN_GAME};
    use crate::user::{InMemoryUserStore, UserRecord};
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn start_packet() -> Packet {
        Packet::GameStart {
            level: 18,
            current: TetrominoType::O,
            next: TetrominoType::T,
        }
    }

    fn frame(packets: &[Packet]) -> Vec<u8> {
        let mut assembler = PacketAssembler::new();
        for p in packets {
            assembler.push(p).unwrap();
        }
        assembler.take()
    }

    /// Random emulator run; returns every packet in order.
    fn random_stream(seed: u64) -> (Vec<Packet>, Emulator) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut emu = Emulator::new(19, "1a2b3c", 1, None).unwrap();
        let (mut emitter, mut packets) = GameStreamEmitter::start(&emu);
        let keys = [
            InputKey::ShiftLeft,
            InputKey::ShiftRight,
            InputKey::RotateLeft,
            InputKey::RotateRight,
            InputKey::Pushdown,
        ];
        while !emitter.is_ended() {
            let mut state = KeyState::NONE;
            if rng.gen_bool(0.3) {
                state = state.with(keys[rng.gen_range(0..keys.len())]);
            }
            emu.execute_frame(state);
            packets.extend(emitter.after_frame(&emu));
        }
        (packets, emu)
    }

    #[test]
    fn test_start_and_end_events() {
        let mut player = GamePlayer::new("u1");
        let outcome = player.handle_frame(&frame(&[
            start_packet(),
            Packet::Placement {
                next_next: TetrominoType::I,
                pose: MtPose { rotation: 0, x: 1, y: 18 },
                pushdown: 2,
            },
        ]));
        assert!(outcome.error.is_none());
        assert!(matches!(outcome.events.as_slice(), [GameEvent::Started(_)]));
        assert!(player.is_in_game());

        let outcome = player.handle_frame(&frame(&[Packet::GameEnd]));
        match outcome.events.as_slice() {
            [GameEvent::Ended(end)] => {
                assert!(!end.forced);
                assert_eq!(end.snapshot.score, 2);
                assert_eq!(end.snapshot.num_placements, 1);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert!(!player.is_in_game());
        assert_eq!(player.topout_score(), Some(2));
    }

    #[test]
    fn test_packet_without_game_is_an_error() {
        let mut player = GamePlayer::new("u1");
        let outcome = player.handle_frame(&frame(&[
            Packet::AbbrBoard {
                delta_ms: 0,
                pose: MtPose { rotation: 0, x: 5, y: 2 },
            },
            start_packet(),
        ]));
        assert_eq!(
            outcome.error,
            Some(ProtocolError::NoGameInProgress(Opcode::AbbrBoard))
        );
        // Nothing after the bad packet was applied
        assert!(outcome.events.is_empty());
        assert!(!player.is_in_game());
    }

    #[test]
    fn test_not_in_game_recovery_only_sets_snapshot() {
        let mut source = GamePlayer::new("u1");
        source.handle_packet(&start_packet()).unwrap();
        source.handle_packet(&Packet::GameEnd).unwrap();
        let recovery = source.recovery_packet();
        match &recovery {
            Packet::Recovery(r) => assert_eq!(r.countdown, COUNTDOWN_NOT_IN_GAME),
            other => panic!("unexpected {other:?}"),
        }

        let mut mirror = GamePlayer::new("u1");
        mirror.handle_packet(&recovery).unwrap();
        assert!(!mirror.is_in_game());
        assert!(mirror.last_snapshot().is_some());
    }

    #[test]
    fn test_force_end() {
        let mut player = GamePlayer::new("u1");
        assert!(player.force_end().is_none());
        player.handle_packet(&start_packet()).unwrap();
        let ended = player.force_end().unwrap();
        assert!(ended.forced);
        assert!(!player.is_in_game());
    }

    #[test]
    fn test_accuracy_from_evaluations() {
        let mut player = GamePlayer::new("u1");
        player.handle_packet(&start_packet()).unwrap();
        player
            .handle_packet(&Packet::Evaluation { best_eval: 50.0, player_eval: 50.0 })
            .unwrap();
        player
            .handle_packet(&Packet::Evaluation { best_eval: 50.0, player_eval: 40.0 })
            .unwrap();
        let ended = player.force_end().unwrap();
        assert_eq!(ended.accuracy, Some(75.0));
    }

    #[test]
    fn test_mid_game_recovery_matches_source() {
        for seed in 0..4 {
            let (packets, emu) = random_stream(seed);
            let split = packets.len() / 2;

            let mut source = GamePlayer::new("u1");
            for p in &packets[..split] {
                source.handle_packet(p).unwrap();
            }

            // Late observer joins from a recovery and follows the rest
            let mut late = GamePlayer::new("u1");
            late.handle_packet(&source.recovery_packet()).unwrap();
            for p in &packets[split..] {
                source.handle_packet(p).unwrap();
                late.handle_packet(p).unwrap();
            }

            assert_eq!(late.topout_score(), Some(emu.score()));
            assert_eq!(source.topout_score(), late.topout_score());
            let source_end = source.last_snapshot().unwrap();
            let late_end = late.last_snapshot().unwrap();
            assert_eq!(late_end.isolated_board, source_end.isolated_board);
            assert_eq!(late_end.score, source_end.score);
            assert_eq!(late_end.level, source_end.level);
            assert_eq!(late_end.lines, source_end.lines);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_same_stream_same_game(seed in any::<u64>()) {
            let (packets, emu) = random_stream(seed);
            let mut a = GamePlayer::new("u1");
            let mut b = GamePlayer::new("u2");
            for p in &packets {
                let a_events = a.handle_packet(p).unwrap();
                let b_events = b.handle_packet(p).unwrap();
                prop_assert_eq!(a_events.len(), b_events.len());
                prop_assert_eq!(a.state(), b.state());
            }

            let a_end = a.last_snapshot().unwrap();
            let b_end = b.last_snapshot().unwrap();
            prop_assert_eq!(a_end, b_end);
            prop_assert_eq!(a_end.score, emu.score());
            prop_assert_eq!(a.topout_score(), b.topout_score());
        }
    }

    #[tokio::test]
    async fn test_record_game_end_personal_best() {
        let users = InMemoryUserStore::new();
        users.get_or_create(UserRecord::new("u1", "alice", false)).await;

        let mut player = GamePlayer::new("u1");
        player.handle_packet(&start_packet()).unwrap();
        player
            .handle_packet(&Packet::Placement {
                next_next: TetrominoType::I,
                pose: MtPose { rotation: 0, x: 1, y: 18 },
                pushdown: 9,
            })
            .unwrap();
        let finished = player.force_end().unwrap();

        let end = record_game_end(&users, "u1", finished.clone(), XpStrategy::Solo, true)
            .await
            .unwrap();
        assert!(end.is_personal_best);
        assert_eq!(end.xp_gained, 0);

        let again = record_game_end(&users, "u1", finished, XpStrategy::Solo, true)
            .await
            .unwrap();
        assert!(!again.is_personal_best);

        let record = users.get("u1").await.unwrap();
        assert_eq!(record.highest_score, 9);
        assert_eq!(record.recent_games.len(), 2);
    }

    #[test]
    fn test_solo_xp() {
        let mut snapshot = GameState::new(18, TetrominoType::T, TetrominoType::T).snapshot();
        snapshot.score = 400_000;
        // 20^1.6 = 120.7
        assert_eq!(XpStrategy::Solo.xp_for(&snapshot), 121);
        assert_eq!(XpStrategy::None.xp_for(&snapshot), 0);
    }
}
