//! Two-player rooms, casual or ranked.
//!
//! ```text
//!   BEFORE_GAME ──both ready──▶ IN_GAME ──point scored──▶ BEFORE_GAME
//!        │                                     │
//!        │ leave before any point              └─ threshold reached / resignation
//!        ▼                                                 ▼
//!     ABORTED                                         AFTER_MATCH ──both ready──▶ rematch
//! ```
//!
//! A point is scored once both players' games have ended. Ranked rooms play
//! a single point and never rematch.

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::game_player::{record_game_end, FinishedGame, GameEvent, GamePlayer, XpStrategy};
use super::lifecycle::{RoomBehavior, RoomCore, RoomTimer, SessionRef};
use super::ranked::RankedSettlement;
use super::state::{
    MatchPoint, MultiplayerPlayerInfo, MultiplayerRoomState, MultiplayerRoomStatus, PlayerSlot,
    PointGame, PointWinner, RoomState, StateHolder,
};
use super::RoomError;
use crate::core::DeterministicRng;
use crate::network::protocol::ClientRoomEvent;
use crate::network::session::{ActivityType, SessionId};
use crate::tetris::PieceSequence;
use crate::user::UserStore;

/// Fixed parameters of a multiplayer room.
#[derive(Debug, Clone)]
pub struct MultiplayerSetup {
    /// Level every point starts on.
    pub start_level: u8,
    /// Level at which games stop.
    pub level_cap: u8,
    /// Points needed to win.
    pub winning_score: f64,
    /// Ranked match data, if ranked.
    pub ranked: Option<RankedSettlement>,
}

/// Multiplayer room strategy.
pub struct MultiplayerRoom {
    setup: MultiplayerSetup,
    state: StateHolder<MultiplayerRoomState>,
    players: Vec<GamePlayer>,
    previous_game: [Option<PointGame>; 2],
    pending_recoveries: [Vec<SessionId>; 2],
    rng: DeterministicRng,
}

impl MultiplayerRoom {
    /// Strategy for a room with the given setup.
    pub fn new(setup: MultiplayerSetup) -> Self {
        let placeholder = MultiplayerRoomState {
            start_level: setup.start_level,
            ranked: setup.ranked.is_some(),
            level_cap: setup.level_cap,
            winning_score: setup.winning_score,
            match_id: setup.ranked.as_ref().map(|r| r.match_id.clone()),
            players: [empty_player(), empty_player()],
            points: Vec::new(),
            current_seed: String::new(),
            last_game_winner: None,
            match_winner: None,
            aborter: None,
            won_by_resignation: false,
            ready: [false, false],
            status: MultiplayerRoomStatus::BeforeGame,
        };
        Self {
            setup,
            state: StateHolder::new(placeholder),
            players: Vec::new(),
            previous_game: [None, None],
            pending_recoveries: [Vec::new(), Vec::new()],
            rng: DeterministicRng::from_entropy(),
        }
    }

    /// Current typed state.
    pub fn typed_state(&self) -> &MultiplayerRoomState {
        self.state.get()
    }

    async fn fresh_state(&mut self, core: &RoomCore) -> MultiplayerRoomState {
        let users = &core.services().users;
        let mut infos = Vec::with_capacity(2);
        for (i, player) in core.players().iter().enumerate() {
            let record = users.get(&player.userid).await.ok();
            infos.push(MultiplayerPlayerInfo {
                userid: player.userid.clone(),
                username: player.username.clone(),
                session_id: player.session_id.clone(),
                trophies: record.as_ref().map_or(0, |r| r.effective_trophies()),
                highest_trophies: record.as_ref().map_or(0, |r| r.highest_trophies.max(0)),
                highscore: record.as_ref().map_or(0, |r| r.highest_score),
                left_room: player.left,
                trophy_delta: self.setup.ranked.as_ref().map(|r| r.deltas[i]),
            });
        }
        let players = match <[MultiplayerPlayerInfo; 2]>::try_from(infos) {
            Ok(players) => players,
            Err(_) => [empty_player(), empty_player()],
        };
        MultiplayerRoomState {
            start_level: self.setup.start_level,
            ranked: self.setup.ranked.is_some(),
            level_cap: self.setup.level_cap,
            winning_score: self.setup.winning_score,
            match_id: self.setup.ranked.as_ref().map(|r| r.match_id.clone()),
            players,
            points: Vec::new(),
            current_seed: PieceSequence::random_seed(&mut self.rng),
            last_game_winner: None,
            match_winner: None,
            aborter: None,
            won_by_resignation: false,
            ready: [false, false],
            status: MultiplayerRoomStatus::BeforeGame,
        }
    }

    fn send_recovery(&mut self, core: &RoomCore, slot: usize, session_id: SessionId) {
        let Some(player) = self.players.get(slot) else {
            return;
        };
        if player.is_in_game() {
            if !self.pending_recoveries[slot].contains(&session_id) {
                self.pending_recoveries[slot].push(session_id);
            }
        } else {
            core.send_slot_packet(&session_id, slot, &player.recovery_packet());
        }
    }

    fn flush_recoveries(&mut self, core: &RoomCore, slot: usize) {
        if self.pending_recoveries[slot].is_empty() {
            return;
        }
        let packet = self.players[slot].recovery_packet();
        for session_id in self.pending_recoveries[slot].drain(..) {
            core.send_slot_packet(&session_id, slot, &packet);
        }
    }

    fn on_ready(&mut self, core: &mut RoomCore, slot: usize) {
        let state = self.state.get();
        let status = state.status;
        if state.ready[slot] {
            return;
        }
        let can_ready = match status {
            MultiplayerRoomStatus::BeforeGame => true,
            MultiplayerRoomStatus::AfterMatch => self.setup.ranked.is_none(),
            _ => false,
        };
        if !can_ready {
            debug!(room_id = %core.id(), slot, status = ?status, "Ignoring ready");
            return;
        }

        self.state.update(|s| s.ready[slot] = true);
        if self.state.get().ready == [true, true] {
            let config = core.config().clone();
            match status {
                MultiplayerRoomStatus::BeforeGame => {
                    core.schedule(config.ready_delay, RoomTimer::StartGame)
                }
                _ => core.schedule(config.rematch_delay, RoomTimer::Rematch),
            }
        }
    }

    async fn on_game_end(&mut self, core: &RoomCore, slot: usize, finished: FinishedGame) {
        let userid = self.players[slot].userid().to_string();
        let game = PointGame {
            game_id: finished.game_id.clone(),
            score: finished.snapshot.score,
        };
        info!(
            room_id = %core.id(),
            userid = %userid,
            score = game.score,
            forced = finished.forced,
            "Multiplayer game ended"
        );
        let users: &dyn UserStore = core.services().users.as_ref();
        if let Err(err) = record_game_end(users, &userid, finished, XpStrategy::None, false).await {
            error!(room_id = %core.id(), userid = %userid, error = %err, "Failed to record game");
        }

        self.previous_game[slot] = Some(game);
        let both = match &self.previous_game {
            [Some(first), Some(second)] => Some([first.clone(), second.clone()]),
            _ => None,
        };
        if let Some(games) = both {
            self.on_both_games_ended(core, games).await;
        }
    }

    async fn on_both_games_ended(&mut self, core: &RoomCore, games: [PointGame; 2]) {
        let mut state = self.state.get().clone();
        if state.status != MultiplayerRoomStatus::InGame {
            return;
        }

        let winner = match games[0].score.cmp(&games[1].score) {
            std::cmp::Ordering::Greater => PointWinner::Player1,
            std::cmp::Ordering::Less => PointWinner::Player2,
            std::cmp::Ordering::Equal => PointWinner::Draw,
        };
        state.last_game_winner = Some(winner);
        state.points.push(MatchPoint {
            seed: state.current_seed.clone(),
            winner,
            game: games,
        });
        state.ready = [false, false];

        let [p1, p2] = state.point_totals();
        if p1 >= state.winning_score || p2 >= state.winning_score {
            state.match_winner = Some(if p1 > p2 {
                PointWinner::Player1
            } else if p1 < p2 {
                PointWinner::Player2
            } else {
                PointWinner::Draw
            });
            state.status = MultiplayerRoomStatus::AfterMatch;
            self.on_match_end(core, &state).await;
        } else if let Some(leaver) = PlayerSlot::BOTH
            .into_iter()
            .find(|s| state.players[s.index()].left_room)
        {
            self.end_by_resignation(core, &mut state, leaver.other()).await;
        } else {
            state.current_seed = PieceSequence::random_seed(&mut self.rng);
            state.status = MultiplayerRoomStatus::BeforeGame;
        }
        self.state.set(state);
    }

    async fn end_by_resignation(&mut self, core: &RoomCore, state: &mut MultiplayerRoomState, winner: PlayerSlot) {
        state.won_by_resignation = true;
        state.match_winner = Some(winner.into());
        state.status = MultiplayerRoomStatus::AfterMatch;
        self.on_match_end(core, state).await;
    }

    async fn on_match_end(&mut self, core: &RoomCore, state: &MultiplayerRoomState) {
        info!(room_id = %core.id(), winner = ?state.match_winner, "Match ended");
        if let Some(settlement) = &self.setup.ranked {
            let services = core.services();
            settlement
                .settle(services.users.as_ref(), &services.directory, state)
                .await;
        }
    }

    /// Shared by leaving the room and the ABORT event.
    async fn on_departure(&mut self, core: &RoomCore, slot: usize, left_room: bool) {
        let Some(player_slot) = PlayerSlot::from_index(slot) else {
            return;
        };
        let mut state = self.state.get().clone();
        if left_room {
            state.players[slot].left_room = true;
        }
        if matches!(
            state.status,
            MultiplayerRoomStatus::AfterMatch | MultiplayerRoomStatus::Aborted
        ) {
            self.state.set(state);
            return;
        }

        if state.aborter.is_none() {
            state.aborter = Some(player_slot);
        }

        let leaver = &self.players[slot];
        if leaver.topout_score().is_none() && !leaver.is_in_game() && state.points.is_empty() {
            state.status = MultiplayerRoomStatus::Aborted;
            let player = &state.players[slot];
            core.services()
                .aborts
                .on_abort(&player.userid, Some(&player.session_id));
            info!(room_id = %core.id(), userid = %player.userid, "Match aborted");
        } else if self.players.iter().all(|p| !p.is_in_game()) {
            self.end_by_resignation(core, &mut state, player_slot.other())
                .await;
        }
        self.state.set(state);

        // May complete the point if the opponent already finished
        if let Some(finished) = self.players[slot].force_end() {
            self.on_game_end(core, slot, finished).await;
        }
    }
}

fn empty_player() -> MultiplayerPlayerInfo {
    MultiplayerPlayerInfo {
        userid: String::new(),
        username: String::new(),
        session_id: String::new(),
        trophies: 0,
        highest_trophies: 0,
        highscore: 0,
        left_room: false,
        trophy_delta: None,
    }
}

#[async_trait]
impl RoomBehavior for MultiplayerRoom {
    async fn init_state(&mut self, core: &mut RoomCore) -> Result<(), RoomError> {
        if core.players().len() != 2 {
            return Err(RoomError::InvalidEvent(format!(
                "multiplayer room needs 2 players, got {}",
                core.players().len()
            )));
        }
        self.players = core
            .players()
            .iter()
            .map(|p| GamePlayer::new(p.userid.clone()))
            .collect();
        let initial = self.fresh_state(core).await;
        self.state.subscribe(core.broadcaster(RoomState::Multiplayer));
        self.state.set(initial);
        Ok(())
    }

    fn state(&self) -> RoomState {
        RoomState::Multiplayer(self.state.get().clone())
    }

    fn activity(&self) -> ActivityType {
        ActivityType::Multiplayer
    }

    async fn on_client_event(
        &mut self,
        core: &mut RoomCore,
        sender: &SessionRef,
        slot: Option<usize>,
        event: ClientRoomEvent,
    ) -> Result<(), RoomError> {
        // Spectators may ask for recoveries too
        if let ClientRoomEvent::RequestRecovery { player_index } = event {
            let index = usize::from(player_index);
            if index >= 2 {
                return Err(RoomError::InvalidEvent(format!("no player {index}")));
            }
            self.send_recovery(core, index, sender.session_id.clone());
            return Ok(());
        }

        let Some(slot) = slot else {
            return Err(RoomError::InvalidEvent("spectators cannot send this event".into()));
        };
        match event {
            ClientRoomEvent::Ready => {
                self.on_ready(core, slot);
                Ok(())
            }
            ClientRoomEvent::Abort => {
                self.on_departure(core, slot, false).await;
                Ok(())
            }
            other => Err(RoomError::InvalidEvent(format!("{other:?} in multiplayer room"))),
        }
    }

    async fn on_binary(&mut self, core: &mut RoomCore, slot: usize, frame: &[u8]) {
        let outcome = self.players[slot].handle_frame(frame);
        for event in outcome.events {
            match event {
                GameEvent::Started(start) => {
                    debug!(room_id = %core.id(), slot, game_id = %start.game_id, "Game started");
                    self.previous_game[slot] = None;
                }
                GameEvent::Ended(finished) => self.on_game_end(core, slot, finished).await,
            }
        }
        self.flush_recoveries(core, slot);
        core.relay(slot, frame);
    }

    async fn on_player_leave(&mut self, core: &mut RoomCore, slot: usize) {
        self.on_departure(core, slot, true).await;
    }

    async fn on_timer(&mut self, core: &mut RoomCore, timer: RoomTimer) {
        match timer {
            RoomTimer::StartGame => {
                let state = self.state.get();
                if state.status == MultiplayerRoomStatus::BeforeGame && state.ready == [true, true] {
                    self.state
                        .update(|s| s.status = MultiplayerRoomStatus::InGame);
                }
            }
            RoomTimer::Rematch => {
                let state = self.state.get();
                let still_wanted = state.status == MultiplayerRoomStatus::AfterMatch
                    && state.ready == [true, true]
                    && core.players().iter().all(|p| !p.left);
                if still_wanted {
                    self.previous_game = [None, None];
                    let fresh = self.fresh_state(core).await;
                    self.state.set(fresh);
                    info!(room_id = %core.id(), "Rematch started");
                }
            }
            RoomTimer::SpectatorRecovery(session_id) => {
                for slot in 0..self.players.len() {
                    self.send_recovery(core, slot, session_id.clone());
                }
            }
            RoomTimer::PuzzleClock(_) => {}
        }
    }

    async fn on_delete(&mut self, core: &mut RoomCore) {
        for slot in 0..self.players.len() {
            if let Some(finished) = self.players[slot].force_end() {
                self.on_game_end(core, slot, finished).await;
            }
        }
    }

    fn tv_score(&self, _core: &RoomCore) -> Option<f64> {
        let state = self.state.get();
        let live = matches!(
            state.status,
            MultiplayerRoomStatus::BeforeGame | MultiplayerRoomStatus::InGame
        );
        if !state.ranked || !live {
            return None;
        }
        // Strongest weaker player first
        Some(f64::from(state.players[0].trophies.min(state.players[1].trophies)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use tokio::sync::Mutex;

    use super::*;
    use crate::matchmaking::elo::TrophyDelta;
    use crate::network::packet::{Packet, PacketAssembler};
    use crate::network::protocol::ServerMessage;
    use crate::room::lifecycle::test_support::*;
    use crate::room::lifecycle::{Room, RoomKind, RoomPlayer};
    use crate::room::ranked::RANKED_WINNING_SCORE;
    use crate::room::state::RoomType;
    use crate::room::RoomServices;
    use crate::tetris::{MtPose, TetrominoType};

    fn frame(packets: &[Packet]) -> Vec<u8> {
        let mut assembler = PacketAssembler::new();
        for p in packets {
            assembler.push(p).unwrap();
        }
        assembler.take()
    }

    fn start() -> Packet {
        Packet::GameStart {
            level: 18,
            current: TetrominoType::O,
            next: TetrominoType::I,
        }
    }

    fn placement(pushdown: u8) -> Packet {
        Packet::Placement {
            next_next: TetrominoType::T,
            pose: MtPose { rotation: 0, x: 4, y: 18 },
            pushdown,
        }
    }

    fn casual() -> MultiplayerSetup {
        MultiplayerSetup {
            start_level: 18,
            level_cap: 39,
            winning_score: 2.0,
            ranked: None,
        }
    }

    fn ranked() -> MultiplayerSetup {
        MultiplayerSetup {
            start_level: 18,
            level_cap: 39,
            winning_score: RANKED_WINNING_SCORE,
            ranked: Some(RankedSettlement::new([
                TrophyDelta { trophy_gain: 30, trophy_loss: -30 },
                TrophyDelta { trophy_gain: 30, trophy_loss: -30 },
            ])),
        }
    }

    async fn create_test_room(
        services: &Arc<RoomServices>,
        a: &TestClient,
        b: &TestClient,
        setup: MultiplayerSetup,
    ) -> Arc<Mutex<Room>> {
        Room::create(
            "mp-1".into(),
            RoomType::Multiplayer,
            vec![
                RoomPlayer::new(&a.userid, &a.userid, &a.session_id),
                RoomPlayer::new(&b.userid, &b.userid, &b.session_id),
            ],
            RoomKind::Multiplayer(MultiplayerRoom::new(setup)),
            Arc::clone(services),
        )
        .await
        .unwrap()
    }

    fn mp_state(room: &Room) -> MultiplayerRoomState {
        match room.state() {
            RoomState::Multiplayer(state) => state,
            other => panic!("Wrong room state: {other:?}"),
        }
    }

    async fn play_point(room: &mut Room, a: &TestClient, b: &TestClient, scores: [u8; 2]) {
        room.on_binary(&a.session_id, &frame(&[start()])).await;
        room.on_binary(&b.session_id, &frame(&[start()])).await;
        room.on_binary(&a.session_id, &frame(&[placement(scores[0]), Packet::GameEnd]))
            .await;
        room.on_binary(&b.session_id, &frame(&[placement(scores[1]), Packet::GameEnd]))
            .await;
    }

    async fn both_ready(room: &mut Room, a: &TestClient, b: &TestClient) {
        let ra = SessionRef::new(&a.userid, &a.session_id);
        let rb = SessionRef::new(&b.userid, &b.session_id);
        room.on_client_event(&ra, ClientRoomEvent::Ready).await.unwrap();
        room.on_client_event(&rb, ClientRoomEvent::Ready).await.unwrap();
        room.on_timer(RoomTimer::StartGame).await;
    }

    #[tokio::test]
    async fn test_start_needs_both_ready_either_order() {
        let services = create_test_services();
        let a = connect(&services, "a").await;
        let b = connect(&services, "b").await;

        for order in [[&a, &b], [&b, &a]] {
            let room = create_test_room(&services, &a, &b, casual()).await;
            let mut room = room.lock().await;
            let first = SessionRef::new(&order[0].userid, &order[0].session_id);
            let second = SessionRef::new(&order[1].userid, &order[1].session_id);

            room.on_client_event(&first, ClientRoomEvent::Ready).await.unwrap();
            room.on_timer(RoomTimer::StartGame).await;
            assert_eq!(mp_state(&room).status, MultiplayerRoomStatus::BeforeGame);

            room.on_client_event(&second, ClientRoomEvent::Ready).await.unwrap();
            room.on_timer(RoomTimer::StartGame).await;
            assert_eq!(mp_state(&room).status, MultiplayerRoomStatus::InGame);
        }
    }

    #[tokio::test]
    async fn test_points_until_threshold() {
        let services = create_test_services();
        let a = connect(&services, "a").await;
        let b = connect(&services, "b").await;
        let room = create_test_room(&services, &a, &b, casual()).await;
        let mut room = room.lock().await;

        both_ready(&mut room, &a, &b).await;
        let first_seed = mp_state(&room).current_seed;
        play_point(&mut room, &a, &b, [10, 5]).await;
        let state = mp_state(&room);
        assert_eq!(state.status, MultiplayerRoomStatus::BeforeGame);
        assert_eq!(state.last_game_winner, Some(PointWinner::Player1));
        assert_eq!(state.points[0].seed, first_seed);
        assert_eq!(state.ready, [false, false]);

        both_ready(&mut room, &a, &b).await;
        play_point(&mut room, &a, &b, [7, 7]).await;
        assert_eq!(mp_state(&room).point_totals(), [1.5, 0.5]);

        both_ready(&mut room, &a, &b).await;
        play_point(&mut room, &a, &b, [9, 1]).await;
        let state = mp_state(&room);
        assert_eq!(state.status, MultiplayerRoomStatus::AfterMatch);
        assert_eq!(state.match_winner, Some(PointWinner::Player1));
        assert!(!state.won_by_resignation);
    }

    #[tokio::test]
    async fn test_leave_before_first_point_aborts() {
        let services = create_test_services();
        let a = connect(&services, "a").await;
        let b = connect(&services, "b").await;
        let room = create_test_room(&services, &a, &b, ranked()).await;
        let mut room = room.lock().await;

        room.player_leave(&a.session_id).await;
        let state = mp_state(&room);
        assert_eq!(state.status, MultiplayerRoomStatus::Aborted);
        assert_eq!(state.aborter, Some(PlayerSlot::Player1));
        assert!(state.players[0].left_room);
        assert_eq!(services.aborts.abort_count_at("a", Instant::now()), 1);
        assert_eq!(services.aborts.abort_count_at("b", Instant::now()), 0);

        // No trophies moved
        assert_eq!(services.users.get("b").await.unwrap().matches_played, 0);
    }

    #[tokio::test]
    async fn test_leave_mid_game_resigns_after_opponent_finishes() {
        let services = create_test_services();
        let a = connect(&services, "a").await;
        let b = connect(&services, "b").await;
        let room = create_test_room(&services, &a, &b, casual()).await;
        let mut room = room.lock().await;

        both_ready(&mut room, &a, &b).await;
        room.on_binary(&a.session_id, &frame(&[start()])).await;
        room.on_binary(&b.session_id, &frame(&[start()])).await;

        room.player_leave(&a.session_id).await;
        assert_eq!(mp_state(&room).status, MultiplayerRoomStatus::InGame);

        room.on_binary(&b.session_id, &frame(&[placement(3), Packet::GameEnd]))
            .await;
        let state = mp_state(&room);
        assert_eq!(state.status, MultiplayerRoomStatus::AfterMatch);
        assert!(state.won_by_resignation);
        assert_eq!(state.match_winner, Some(PointWinner::Player2));
        assert_eq!(state.points.len(), 1);
    }

    #[tokio::test]
    async fn test_ranked_settles_and_notifies() {
        let services = create_test_services();
        let mut a = connect(&services, "a").await;
        let b = connect(&services, "b").await;
        let room = create_test_room(&services, &a, &b, ranked()).await;
        let mut room = room.lock().await;

        both_ready(&mut room, &a, &b).await;
        play_point(&mut room, &a, &b, [20, 10]).await;
        let state = mp_state(&room);
        assert_eq!(state.status, MultiplayerRoomStatus::AfterMatch);
        assert_eq!(state.match_winner, Some(PointWinner::Player1));

        let record = services.users.get("a").await.unwrap();
        assert_eq!(record.wins, 1);
        assert_eq!(record.trophies, 30);
        assert!(a
            .json()
            .iter()
            .any(|m| matches!(m, ServerMessage::TrophyChange { trophy_delta: 30, .. })));

        // No rematch in ranked
        let ra = SessionRef::new(&a.userid, &a.session_id);
        room.on_client_event(&ra, ClientRoomEvent::Ready).await.unwrap();
        assert_eq!(mp_state(&room).ready, [false, false]);
    }

    #[tokio::test]
    async fn test_casual_rematch_resets() {
        let services = create_test_services();
        let a = connect(&services, "a").await;
        let b = connect(&services, "b").await;
        let mut setup = casual();
        setup.winning_score = 1.0;
        let room = create_test_room(&services, &a, &b, setup).await;
        let mut room = room.lock().await;

        both_ready(&mut room, &a, &b).await;
        play_point(&mut room, &a, &b, [1, 2]).await;
        assert_eq!(mp_state(&room).status, MultiplayerRoomStatus::AfterMatch);

        let ra = SessionRef::new(&a.userid, &a.session_id);
        let rb = SessionRef::new(&b.userid, &b.session_id);
        room.on_client_event(&ra, ClientRoomEvent::Ready).await.unwrap();
        room.on_client_event(&rb, ClientRoomEvent::Ready).await.unwrap();
        room.on_timer(RoomTimer::Rematch).await;

        let state = mp_state(&room);
        assert_eq!(state.status, MultiplayerRoomStatus::BeforeGame);
        assert!(state.points.is_empty());
        assert!(state.match_winner.is_none());
    }

    #[tokio::test]
    async fn test_spectator_cannot_ready() {
        let services = create_test_services();
        let a = connect(&services, "a").await;
        let b = connect(&services, "b").await;
        let c = connect(&services, "c").await;
        let room = create_test_room(&services, &a, &b, casual()).await;
        let mut room = room.lock().await;
        let spectator = SessionRef::new(&c.userid, &c.session_id);
        room.add_spectator(spectator.clone()).unwrap();

        let err = room
            .on_client_event(&spectator, ClientRoomEvent::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::InvalidEvent(_)));
        room.on_client_event(&spectator, ClientRoomEvent::RequestRecovery { player_index: 1 })
            .await
            .unwrap();
    }
}
