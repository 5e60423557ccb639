//! Ranked match settlement.
//!
//! A ranked room is a multiplayer room decided by a single point. The trophy
//! deltas were fixed when the pairing was made; settlement only picks which
//! side of each delta applies.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::state::{MultiplayerRoomState, PlayerSlot, PointWinner};
use crate::matchmaking::elo::{MatchResult, TrophyDelta};
use crate::network::protocol::ServerMessage;
use crate::network::session::SessionDirectory;
use crate::user::{UserEvent, UserStore};

/// Points needed to win a ranked match.
pub const RANKED_WINNING_SCORE: f64 = 0.5;

/// Ranked match data carried by a multiplayer room.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSettlement {
    /// Match id.
    pub match_id: String,
    /// When the room was built.
    pub start_time: DateTime<Utc>,
    /// Deltas in slot order.
    pub deltas: [TrophyDelta; 2],
}

/// One side of a settled match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledSide {
    /// Outcome.
    pub result: MatchResult,
    /// Trophies before the match.
    pub start_trophies: i32,
    /// Signed change applied.
    pub trophy_change: i32,
}

impl RankedSettlement {
    /// New match starting now.
    pub fn new(deltas: [TrophyDelta; 2]) -> Self {
        Self {
            match_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            deltas,
        }
    }

    /// Outcome for a slot given the match winner.
    pub fn result_for(winner: PointWinner, slot: PlayerSlot) -> MatchResult {
        match winner {
            PointWinner::Draw => MatchResult::Draw,
            w if w == PointWinner::from(slot) => MatchResult::Win,
            _ => MatchResult::Loss,
        }
    }

    /// Work out both sides without applying anything.
    pub fn sides(&self, state: &MultiplayerRoomState, winner: PointWinner) -> [SettledSide; 2] {
        PlayerSlot::BOTH.map(|slot| {
            let result = Self::result_for(winner, slot);
            SettledSide {
                result,
                start_trophies: state.players[slot.index()].trophies,
                trophy_change: self.deltas[slot.index()].change_for(result),
            }
        })
    }

    /// Apply trophies to both players and tell their sessions.
    pub async fn settle(
        &self,
        users: &dyn UserStore,
        directory: &SessionDirectory,
        state: &MultiplayerRoomState,
    ) -> Option<[SettledSide; 2]> {
        let Some(winner) = state.match_winner else {
            error!(match_id = %self.match_id, "Ranked match ended without a winner");
            return None;
        };
        let sides = self.sides(state, winner);

        for slot in PlayerSlot::BOTH {
            let player = &state.players[slot.index()];
            let side = sides[slot.index()];
            directory.send_to_session(
                &player.session_id,
                ServerMessage::TrophyChange {
                    start_trophies: side.start_trophies,
                    trophy_delta: side.trophy_change,
                },
            );
            let event = UserEvent::RankedMatchEnd {
                xp_gained: 0,
                win: side.result == MatchResult::Win,
                lose: side.result == MatchResult::Loss,
                trophy_change: side.trophy_change,
            };
            if let Err(err) = users.alter(&player.userid, event).await {
                error!(match_id = %self.match_id, userid = %player.userid, error = %err, "Failed to apply ranked result");
            }
        }

        let duration = Utc::now() - self.start_time;
        info!(
            match_id = %self.match_id,
            winner = ?winner,
            seconds = duration.num_seconds(),
            "Ranked match settled"
        );
        Some(sides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::state::{MultiplayerPlayerInfo, MultiplayerRoomStatus};
    use crate::user::{InMemoryUserStore, UserRecord};

    fn player(userid: &str, trophies: i32) -> MultiplayerPlayerInfo {
        MultiplayerPlayerInfo {
            userid: userid.into(),
            username: userid.into(),
            session_id: format!("{userid}-session"),
            trophies,
            highest_trophies: trophies,
            highscore: 0,
            left_room: false,
            trophy_delta: None,
        }
    }

    fn create_test_state(winner: Option<PointWinner>) -> MultiplayerRoomState {
        MultiplayerRoomState {
            start_level: 18,
            ranked: true,
            level_cap: 39,
            winning_score: RANKED_WINNING_SCORE,
            match_id: None,
            players: [player("a", 1000), player("b", 1100)],
            points: Vec::new(),
            current_seed: "000000".into(),
            last_game_winner: None,
            match_winner: winner,
            aborter: None,
            won_by_resignation: false,
            ready: [false, false],
            status: MultiplayerRoomStatus::AfterMatch,
        }
    }

    fn deltas() -> [TrophyDelta; 2] {
        [
            TrophyDelta { trophy_gain: 40, trophy_loss: -20 },
            TrophyDelta { trophy_gain: 25, trophy_loss: -35 },
        ]
    }

    #[test]
    fn test_sides_for_each_outcome() {
        let settlement = RankedSettlement::new(deltas());
        let state = create_test_state(None);

        let p1_wins = settlement.sides(&state, PointWinner::Player1);
        assert_eq!(p1_wins[0].trophy_change, 40);
        assert_eq!(p1_wins[1].trophy_change, -35);

        let draw = settlement.sides(&state, PointWinner::Draw);
        assert_eq!(draw[0].trophy_change, 10);
        assert_eq!(draw[1].trophy_change, -5);
        assert_eq!(draw[1].result, MatchResult::Draw);
    }

    #[tokio::test]
    async fn test_settle_applies_to_store() {
        let users = InMemoryUserStore::new();
        for (id, trophies) in [("a", 1000), ("b", 1100)] {
            let mut record = UserRecord::new(id, id, false);
            record.trophies = trophies;
            record.highest_trophies = trophies;
            users.get_or_create(record).await;
        }
        let directory = SessionDirectory::new();
        let settlement = RankedSettlement::new(deltas());
        let state = create_test_state(Some(PointWinner::Player2));

        let sides = settlement.settle(&users, &directory, &state).await.unwrap();
        assert_eq!(sides[1].result, MatchResult::Win);

        let a = users.get("a").await.unwrap();
        let b = users.get("b").await.unwrap();
        assert_eq!(a.trophies, 980);
        assert_eq!(a.losses, 1);
        assert_eq!(b.trophies, 1125);
        assert_eq!(b.wins, 1);
        assert_eq!(b.highest_trophies, 1125);
    }

    #[tokio::test]
    async fn test_settle_without_winner() {
        let users = InMemoryUserStore::new();
        let directory = SessionDirectory::new();
        let settlement = RankedSettlement::new(deltas());
        assert!(settlement
            .settle(&users, &directory, &create_test_state(None))
            .await
            .is_none());
    }
}
