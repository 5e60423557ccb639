//! Ranked bot.
//!
//! A [`RankedBotUser`] lives like a regular player: it connects, queues for
//! ranked, greets its opponent, plays the point with a [`PlacementAi`],
//! says goodbye and leaves. Between matches it occasionally disconnects
//! for a break.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::batcher::PacketBatcher;
use super::evaluator::Evaluator;
use super::placement_ai::{AiConfig, PlacementAi};
use super::session::BotSession;
use super::{BotConfig, BotError};
use crate::context::ServerContext;
use crate::core::DeterministicRng;
use crate::network::emitter::GameStreamEmitter;
use crate::network::packet::Packet;
use crate::network::protocol::{ClientMessage, ClientRoomEvent, InRoomStatus, QueueType};
use crate::room::state::{MultiplayerRoomState, MultiplayerRoomStatus};
use crate::room::{GameMirror, RetryAction};
use crate::tetris::rules::FRAMES_PER_SECOND;
use crate::tetris::{Emulator, InputKey, KeyState};

/// Countdown steps before each bot game.
const COUNTDOWN_STEPS: u8 = 3;
/// Upper bound on any single wait for the room to change phase.
const ROOM_PHASE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Extra time allowed for a matched pairing to open its room.
const ROOM_OPEN_GRACE: Duration = Duration::from_secs(5);
/// Frames into a placement before a settled bot starts dropping.
const TOPOUT_GRACE_FRAMES: u32 = 10;

/// Lines a bot may say before the first game.
pub const BEFORE_GAME_MESSAGES: &[&str] = &[
    "glhf",
    "gl",
    "good luck",
    "hf",
    "have fun",
    "lets have a good game",
    "hope its a good one",
    "lets do this",
    "ready up",
    "lets run it",
    "match time",
    "all set",
    "locked in",
    "lets get it",
    "lets go",
    "queue up",
    "may the best player win",
];

/// Lines a bot may say after the match.
pub const AFTER_GAME_MESSAGES: &[&str] = &[
    "gg",
    "good game",
    "ggs",
    "wp",
    "well played",
    "close one",
    "thanks for the game",
    "nice match",
    "good stuff",
    "tough one",
    "respect",
    "solid game",
    "we take those",
    "next time",
    "you got me",
    "gg wp",
];

/// Vary capitalisation and punctuation so canned lines look typed.
pub fn randomize_message(message: &str, rng: &mut DeterministicRng) -> String {
    let mut chars = message.chars();
    let mut out = match chars.next() {
        Some(first) if rng.chance(0.5) => first.to_uppercase().chain(chars).collect(),
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    };
    if rng.chance(0.5) {
        out.push('!');
    }
    out
}

/// A bot account that plays ranked.
pub struct RankedBotUser {
    ctx: Arc<ServerContext>,
    userid: String,
    username: String,
    ai_config: AiConfig,
    evaluator: Arc<dyn Evaluator>,
    config: BotConfig,
    rng: DeterministicRng,
    session: Option<BotSession>,
}

impl RankedBotUser {
    /// Bot for an existing bot account.
    pub fn new(
        ctx: Arc<ServerContext>,
        userid: impl Into<String>,
        username: impl Into<String>,
        ai_config: AiConfig,
        evaluator: Arc<dyn Evaluator>,
        config: BotConfig,
        rng: DeterministicRng,
    ) -> Self {
        Self {
            ctx,
            userid: userid.into(),
            username: username.into(),
            ai_config,
            evaluator,
            config,
            rng,
            session: None,
        }
    }

    /// The bot's user id.
    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// Live until `shutdown` fires, then disconnect.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(userid = %self.userid, "Bot shutting down");
            }
            _ = self.lifecycle() => {}
        }
        self.disconnect().await;
    }

    async fn lifecycle(&mut self) {
        let warmup = self.random_delay(self.config.warmup);
        tokio::time::sleep(warmup).await;
        self.connect().await;

        loop {
            let pause = self.random_delay(self.config.pre_queue);
            tokio::time::sleep(pause).await;

            match self.find_match().await {
                Ok(true) => {}
                Ok(false) => {
                    self.take_break().await;
                    continue;
                }
                Err(err) => {
                    warn!(userid = %self.userid, error = %err, "Bot could not queue");
                    self.take_break().await;
                    continue;
                }
            }

            match self.play_match().await {
                Ok(()) => {}
                Err(BotError::LeftRoomEarly) => {
                    info!(userid = %self.userid, "Bot left the room early");
                }
                Err(BotError::MatchAborted) => {
                    info!(userid = %self.userid, "Bot match aborted");
                }
                Err(err) => {
                    warn!(userid = %self.userid, error = %err, "Bot match failed");
                }
            }
            self.free_session().await;

            if self.rng.chance(self.config.break_chance) {
                self.take_break().await;
            }
        }
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    async fn connect(&mut self) {
        if self.session.is_none() {
            let session = BotSession::connect(Arc::clone(&self.ctx), &self.userid, &self.username).await;
            self.session = Some(session);
        }
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.disconnect().await;
        }
    }

    async fn take_break(&mut self) {
        let length = self.random_delay(self.config.break_length);
        debug!(userid = %self.userid, secs = length.as_secs(), "Bot taking a break");
        self.disconnect().await;
        tokio::time::sleep(length).await;
        self.connect().await;
    }

    fn session(&mut self) -> Result<&mut BotSession, BotError> {
        self.session.as_mut().ok_or(BotError::NotConnected)
    }

    async fn free_session(&mut self) {
        if let Some(session) = self.session.as_ref() {
            if session.status() != InRoomStatus::None {
                session.send(ClientMessage::LeaveRoom).await;
            }
        }
    }

    fn random_delay(&mut self, (min, max): (Duration, Duration)) -> Duration {
        self.rng
            .next_duration_ms(min.as_millis() as u64, max.as_millis() as u64)
    }

    async fn maybe_chat(&mut self, lines: &[&str]) {
        if !self.rng.chance(self.config.chat_chance) {
            return;
        }
        let Some(line) = self.rng.choose(lines).copied() else {
            return;
        };
        let message = randomize_message(line, &mut self.rng);
        if let Ok(session) = self.session() {
            session.send(ClientMessage::Chat { message }).await;
        }
    }

    // =========================================================================
    // MATCH FLOW
    // =========================================================================

    /// Queue and wait for a room. False if no match came within the timeout.
    async fn find_match(&mut self) -> Result<bool, BotError> {
        let queue = Arc::clone(self.ctx.queue());
        let timeout = self.config.find_match_timeout;
        let start_delay = queue.config().match_start_delay;
        let userid = self.userid.clone();
        let session = self.session()?;

        session
            .send(ClientMessage::JoinRankedQueue {
                queue_type: QueueType::Ranked,
            })
            .await;
        if !queue.contains(&userid) && !queue.is_matched(&userid) {
            debug!(userid = %userid, "Bot queue join refused");
            return Ok(false);
        }

        let is_player = |v: &super::RoomView| v.status == InRoomStatus::Player;
        if session.wait_until(timeout, is_player).await {
            return Ok(true);
        }
        if queue.is_matched(&userid) {
            // Paired just before the timeout; the room opens after the start delay
            return Ok(session
                .wait_until(start_delay + ROOM_OPEN_GRACE, is_player)
                .await);
        }
        session.send(ClientMessage::LeaveRankedQueue).await;
        debug!(userid = %userid, "Bot found no match");
        Ok(false)
    }

    async fn play_match(&mut self) -> Result<(), BotError> {
        let state = self.match_start().await?;
        if state.status == MultiplayerRoomStatus::InGame {
            self.play_game(&state).await?;
        }
        self.match_end().await
    }

    /// Greet, ready up and wait for the point to start.
    async fn match_start(&mut self) -> Result<MultiplayerRoomState, BotError> {
        let greeting = self.random_delay(self.config.greeting_delay);
        tokio::time::sleep(greeting).await;
        self.maybe_chat(BEFORE_GAME_MESSAGES).await;
        let ready = self.random_delay(self.config.ready_delay);
        tokio::time::sleep(ready).await;

        let session = self.session()?;
        session.send_event(ClientRoomEvent::Ready).await;
        session
            .wait_until(ROOM_PHASE_TIMEOUT, |v| {
                v.status != InRoomStatus::Player
                    || v.multiplayer()
                        .map_or(true, |s| s.status != MultiplayerRoomStatus::BeforeGame)
            })
            .await;

        let view = session.view();
        if view.status != InRoomStatus::Player {
            return Err(BotError::LeftRoomEarly);
        }
        let state = view
            .multiplayer()
            .cloned()
            .ok_or_else(|| BotError::UnexpectedRoom("not a multiplayer room".into()))?;
        if state.status == MultiplayerRoomStatus::Aborted {
            return Err(BotError::MatchAborted);
        }
        Ok(state)
    }

    /// Play one game in real time until the emulator ends it.
    async fn play_game(&mut self, state: &MultiplayerRoomState) -> Result<(), BotError> {
        let room_config = self.ctx.services().config.clone();
        let frame_sleep = self.config.frame_loop_sleep;
        let mullen = self.random_delay(self.config.mullen);
        let mut ai = PlacementAi::new(
            self.ai_config,
            Arc::clone(&self.evaluator),
            DeterministicRng::new(self.rng.next_u64()),
        );
        let mut batcher = PacketBatcher::new(self.config.flush_interval);
        let session = self.session()?;

        let slot = state
            .slot_of_session(session.session_id())
            .ok_or_else(|| BotError::UnexpectedRoom("bot is not a player".into()))?;
        let opponent = slot.other().index();
        let userids: Vec<String> = state.players.iter().map(|p| p.userid.clone()).collect();
        let mut mirror = GameMirror::new(
            &userids,
            room_config.recovery_retry_interval,
            room_config.recovery_retry_attempts,
            false,
        );

        let mut emu = Emulator::new(
            state.start_level,
            &state.current_seed,
            COUNTDOWN_STEPS,
            Some(state.level_cap),
        )?;
        ai.register_placement(0, emu.board().clone(), emu.current(), Some(emu.next()), emu.level(), emu.lines());
        let (mut emitter, packets) = GameStreamEmitter::start(&emu);
        for packet in &packets {
            batcher.push(packet);
        }
        info!(userid = %session.userid(), seed = %state.current_seed, "Bot game started");

        let start = Instant::now();
        let mut frames_played: u64 = 0;
        let mut index: u32 = 0;
        let mut placements = emu.num_placements();
        let mut settled_at: Option<Instant> = None;

        loop {
            let now = Instant::now();
            for frame in session.drain_binary() {
                if let Err(err) = mirror.handle_relayed(&frame, now) {
                    debug!(error = %err, "Undecodable relayed frame");
                }
            }
            for (player_index, action) in mirror.poll(now) {
                if action == RetryAction::RequestRecovery {
                    session
                        .send_event(ClientRoomEvent::RequestRecovery { player_index })
                        .await;
                }
            }

            let view = session.view();
            if view.status != InRoomStatus::Player {
                return Err(BotError::LeftRoomEarly);
            }
            if settled_at.is_none() {
                let outscored = mirror
                    .topout_score(opponent)
                    .is_some_and(|score| score < emu.score());
                let opponent_left = view
                    .multiplayer()
                    .is_some_and(|s| s.players[opponent].left_room);
                if outscored || opponent_left {
                    debug!(userid = %session.userid(), "Outcome settled, bot will top out");
                    settled_at = Some(now);
                }
            }
            let allow_topout = settled_at.is_some_and(|at| now.duration_since(at) > mullen);

            for computed in ai.poll_computed() {
                batcher.push(&Packet::Evaluation {
                    best_eval: computed.best_eval as f32,
                    player_eval: computed.player_eval as f32,
                });
            }

            let due = (start.elapsed().as_secs_f64() * f64::from(FRAMES_PER_SECOND)) as u64;
            while frames_played < due && !emitter.is_ended() {
                let in_control = emu.countdown() == 0 && !emu.is_piece_locked();
                let frame = emu.placement_frame_count();
                let keys = if !in_control {
                    KeyState::NONE
                } else if allow_topout && frame > TOPOUT_GRACE_FRAMES {
                    KeyState::NONE.with(InputKey::Pushdown)
                } else {
                    ai.input_for(index, i64::from(frame))
                };
                emu.execute_frame(keys);
                frames_played += 1;

                if emu.num_placements() != placements {
                    placements = emu.num_placements();
                    if !emu.is_over() {
                        index += 1;
                        let mut board = emu.board().clone();
                        board.clear_lines();
                        ai.register_placement(
                            index,
                            board,
                            emu.next(),
                            Some(emu.next_next()),
                            emu.level(),
                            emu.lines(),
                        );
                    }
                }
                for packet in emitter.after_frame(&emu) {
                    batcher.push(&packet);
                }
            }

            if let Some(frame) = batcher.flush_if_due(Instant::now()) {
                session.send_binary(&frame).await;
            }
            if emitter.is_ended() {
                break;
            }
            tokio::time::sleep(frame_sleep).await;
        }

        if let Some(frame) = batcher.finish() {
            session.send_binary(&frame).await;
        }
        info!(
            userid = %session.userid(),
            score = emu.score(),
            lines = emu.lines(),
            level = emu.level(),
            "Bot game ended"
        );
        Ok(())
    }

    /// Wait for the match result, say goodbye and leave.
    async fn match_end(&mut self) -> Result<(), BotError> {
        let session = self.session()?;
        session
            .wait_until(ROOM_PHASE_TIMEOUT, |v| {
                v.status != InRoomStatus::Player
                    || v.multiplayer().map_or(true, |s| {
                        matches!(
                            s.status,
                            MultiplayerRoomStatus::AfterMatch | MultiplayerRoomStatus::Aborted
                        )
                    })
            })
            .await;
        if session.status() != InRoomStatus::Player {
            return Err(BotError::LeftRoomEarly);
        }

        let farewell = self.random_delay(self.config.farewell_delay);
        tokio::time::sleep(farewell).await;
        self.maybe_chat(AFTER_GAME_MESSAGES).await;
        let linger = self.random_delay(self.config.leave_delay);
        tokio::time::sleep(linger).await;

        self.session()?.send(ClientMessage::LeaveRoom).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::evaluator::HeuristicEvaluator;
    use crate::bot::placement_ai::InputSpeed;
    use crate::context::test_support::create_test_context;
    use crate::matchmaking::MatchmakingConfig;
    use crate::network::packet::decode_slot_frame;
    use crate::network::protocol::ServerMessage;
    use crate::network::session::Outbound;
    use crate::user::UserRecord;
    use tokio::sync::mpsc;

    fn quick_bot_config() -> BotConfig {
        let zero = (Duration::ZERO, Duration::ZERO);
        BotConfig {
            enabled: true,
            warmup: zero,
            pre_queue: zero,
            find_match_timeout: Duration::from_secs(5),
            break_length: (Duration::from_secs(60), Duration::from_secs(60)),
            break_chance: 0.0,
            chat_chance: 1.0,
            greeting_delay: zero,
            ready_delay: zero,
            farewell_delay: zero,
            leave_delay: zero,
            mullen: zero,
            ..BotConfig::default()
        }
    }

    fn quick_matchmaking() -> MatchmakingConfig {
        MatchmakingConfig {
            tick_interval: Duration::from_millis(10),
            min_queue_time: Duration::ZERO,
            bot_wait: Duration::ZERO,
            match_start_delay: Duration::from_millis(20),
            ..MatchmakingConfig::default()
        }
    }

    #[test]
    fn test_randomize_message() {
        let mut rng = DeterministicRng::new(1);
        let mut seen_upper = false;
        let mut seen_bang = false;
        for _ in 0..64 {
            let msg = randomize_message("glhf", &mut rng);
            assert!(msg.eq_ignore_ascii_case("glhf") || msg.eq_ignore_ascii_case("glhf!"));
            assert_eq!(&msg[1..4], "lhf");
            seen_upper |= msg.starts_with('G');
            seen_bang |= msg.ends_with('!');
        }
        assert!(seen_upper && seen_bang);
        assert_eq!(randomize_message("", &mut DeterministicRng::new(2)).trim_end_matches('!'), "");
    }

    #[test]
    fn test_canned_lines_are_lowercase() {
        for line in BEFORE_GAME_MESSAGES.iter().chain(AFTER_GAME_MESSAGES) {
            assert_eq!(*line, line.to_lowercase());
        }
    }

    #[tokio::test]
    async fn test_bot_queues_greets_and_starts_playing() {
        let ctx = create_test_context(quick_matchmaking());
        let (shutdown_tx, _) = broadcast::channel(1);
        let matchmaking = ctx.spawn_matchmaking(shutdown_tx.subscribe());

        // A human eligible for ranked
        let mut human = UserRecord::new("alice", "Alice", false);
        human.trophies = 1000;
        human.highest_score = 100_000;
        ctx.users().get_or_create(human).await;
        let mut bot_record = UserRecord::new("bot-400-1", "Bot", true);
        bot_record.trophies = 1000;
        ctx.users().get_or_create(bot_record).await;

        let (tx, mut rx) = mpsc::channel::<Outbound>(1024);
        let alice = ctx.connect("alice", "Alice", false, tx).await;
        ctx.handle_message(&alice, ClientMessage::JoinRankedQueue { queue_type: QueueType::Ranked })
            .await;

        let bot = RankedBotUser::new(
            Arc::clone(&ctx),
            "bot-400-1",
            "Bot",
            AiConfig::flawless(InputSpeed::Hz10),
            Arc::new(HeuristicEvaluator),
            quick_bot_config(),
            DeterministicRng::new(42),
        );
        let bot_task = tokio::spawn(bot.run(shutdown_tx.subscribe()));

        // Wait for the room, then ready up
        let mut in_room = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if ctx.directory().activity("alice").is_some_and(|a| {
                a.kind == crate::network::session::ActivityType::Multiplayer
            }) {
                in_room = true;
                break;
            }
        }
        assert!(in_room);
        ctx.handle_message(&alice, ClientMessage::ClientRoomEvent { event: ClientRoomEvent::Ready })
            .await;

        // The bot's game stream is relayed to the human
        let mut chat = false;
        let mut game_start = false;
        for _ in 0..300 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            while let Ok(item) = rx.try_recv() {
                match item {
                    Outbound::Json(ServerMessage::Chat { username, .. }) => {
                        chat |= username == "Bot";
                    }
                    Outbound::Binary(frame) => {
                        let (_, packets) = decode_slot_frame(&frame).unwrap();
                        game_start |= packets
                            .collect_all()
                            .unwrap()
                            .iter()
                            .any(|p| matches!(p, Packet::GameStart { .. }));
                    }
                    Outbound::Json(_) => {}
                }
            }
            if game_start {
                break;
            }
        }
        assert!(chat);
        assert!(game_start);

        shutdown_tx.send(()).unwrap();
        bot_task.await.unwrap();
        matchmaking.await.unwrap();
        assert!(ctx.directory().sessions_of("bot-400-1").is_empty());
    }
}
