//! Solo room: one player, free play, spectatable.

use async_trait::async_trait;
use tracing::{debug, error};

use super::game_player::{record_game_end, FinishedGame, GameEvent, GamePlayer, XpStrategy};
use super::lifecycle::{RoomBehavior, RoomCore, RoomTimer, SessionRef};
use super::state::{RoomState, SoloGameSummary, SoloRoomState, StateHolder};
use super::RoomError;
use crate::network::protocol::ClientRoomEvent;
use crate::network::session::{ActivityType, SessionId};

/// Solo room strategy.
pub struct SoloRoom {
    state: StateHolder<SoloRoomState>,
    player: GamePlayer,
    pending_recoveries: Vec<SessionId>,
}

impl SoloRoom {
    /// Fresh strategy; the player is bound in `init_state`.
    pub fn new() -> Self {
        Self {
            state: StateHolder::new(SoloRoomState::default()),
            player: GamePlayer::new(String::new()),
            pending_recoveries: Vec::new(),
        }
    }

    /// Current typed state.
    pub fn typed_state(&self) -> &SoloRoomState {
        self.state.get()
    }

    fn send_recovery(&mut self, core: &RoomCore, session_id: SessionId) {
        if self.player.is_in_game() {
            // Sent after the player's next frame
            if !self.pending_recoveries.contains(&session_id) {
                self.pending_recoveries.push(session_id);
            }
        } else {
            core.send_slot_packet(&session_id, 0, &self.player.recovery_packet());
        }
    }

    fn flush_recoveries(&mut self, core: &RoomCore) {
        if self.pending_recoveries.is_empty() {
            return;
        }
        let packet = self.player.recovery_packet();
        for session_id in self.pending_recoveries.drain(..) {
            core.send_slot_packet(&session_id, 0, &packet);
        }
    }

    async fn on_game_end(&mut self, core: &RoomCore, finished: FinishedGame) {
        let users = &core.services().users;
        let userid = self.player.userid().to_string();
        let summary = match record_game_end(users.as_ref(), &userid, finished.clone(), XpStrategy::Solo, true).await {
            Ok(ended) => SoloGameSummary {
                game_id: ended.game_id,
                score: ended.snapshot.score,
                is_personal_best: ended.is_personal_best,
                lines_cleared: ended.snapshot.lines,
                tetris_count: ended.snapshot.tetris_count,
                accuracy: ended.accuracy,
            },
            Err(err) => {
                error!(room_id = %core.id(), userid = %userid, error = %err, "Failed to record solo game");
                SoloGameSummary {
                    game_id: finished.game_id,
                    score: finished.snapshot.score,
                    is_personal_best: false,
                    lines_cleared: finished.snapshot.lines,
                    tetris_count: finished.snapshot.tetris_count,
                    accuracy: finished.accuracy,
                }
            }
        };
        let previous_games = match users.get(&userid).await {
            Ok(record) => record.recent_games,
            Err(_) => self.state.get().previous_games.clone(),
        };
        self.state.update(|s| {
            s.server_in_game = false;
            s.previous_games = previous_games;
            s.last_game_summary = Some(summary);
        });
    }
}

impl Default for SoloRoom {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomBehavior for SoloRoom {
    async fn init_state(&mut self, core: &mut RoomCore) -> Result<(), RoomError> {
        let player = core
            .player(0)
            .ok_or_else(|| RoomError::InvalidEvent("solo room without a player".into()))?;
        self.player = GamePlayer::new(player.userid.clone());
        let previous_games = core
            .services()
            .users
            .get(&player.userid)
            .await
            .map(|r| r.recent_games)
            .unwrap_or_default();

        self.state.subscribe(core.broadcaster(RoomState::Solo));
        self.state.set(SoloRoomState {
            server_in_game: false,
            previous_games,
            last_game_summary: None,
        });
        Ok(())
    }

    fn state(&self) -> RoomState {
        RoomState::Solo(self.state.get().clone())
    }

    fn activity(&self) -> ActivityType {
        ActivityType::Solo
    }

    async fn on_client_event(
        &mut self,
        core: &mut RoomCore,
        sender: &SessionRef,
        _slot: Option<usize>,
        event: ClientRoomEvent,
    ) -> Result<(), RoomError> {
        match event {
            ClientRoomEvent::RequestRecovery { player_index: 0 } => {
                self.send_recovery(core, sender.session_id.clone());
                Ok(())
            }
            other => Err(RoomError::InvalidEvent(format!("{other:?} in solo room"))),
        }
    }

    async fn on_binary(&mut self, core: &mut RoomCore, slot: usize, frame: &[u8]) {
        core.relay(slot, frame);
        let outcome = self.player.handle_frame(frame);
        for event in outcome.events {
            match event {
                GameEvent::Started(start) => {
                    debug!(room_id = %core.id(), game_id = %start.game_id, "Solo game started");
                    self.state.update(|s| s.server_in_game = true);
                }
                GameEvent::Ended(finished) => self.on_game_end(core, finished).await,
            }
        }
        self.flush_recoveries(core);
    }

    async fn on_player_leave(&mut self, core: &mut RoomCore, _slot: usize) {
        if let Some(finished) = self.player.force_end() {
            self.on_game_end(core, finished).await;
        }
    }

    async fn on_timer(&mut self, core: &mut RoomCore, timer: RoomTimer) {
        if let RoomTimer::SpectatorRecovery(session_id) = timer {
            self.send_recovery(core, session_id);
        }
    }

    async fn on_delete(&mut self, core: &mut RoomCore) {
        if let Some(finished) = self.player.force_end() {
            self.on_game_end(core, finished).await;
        }
    }
}
