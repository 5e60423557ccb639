//! Persistent per-user record and the events that alter it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// User identifier.
pub type UserId = String;

/// Trophies value meaning "never chose a starting bracket".
pub const TROPHIES_UNSET: i32 = -1;

/// Number of recent solo games kept on the record.
pub const RECENT_GAMES: usize = 10;

/// One finished solo game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentGame {
    /// Game id.
    pub game_id: String,
    /// Final score.
    pub score: u32,
    /// XP awarded.
    pub xp_gained: u32,
}

/// Stored user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
    /// Bot account.
    pub is_bot: bool,
    /// Lifetime XP.
    pub xp: u64,
    /// [`TROPHIES_UNSET`] until a bracket is chosen.
    pub trophies: i32,
    /// Highest trophies ever held.
    pub highest_trophies: i32,
    /// Ranked matches played.
    pub matches_played: u32,
    /// Ranked wins.
    pub wins: u32,
    /// Ranked losses.
    pub losses: u32,
    /// Best game score.
    pub highest_score: u32,
    /// Best level reached.
    pub highest_level: u8,
    /// Most lines in one game.
    pub highest_lines: u16,
    /// Games played of any kind.
    pub games_played: u32,
    /// Puzzle rating.
    pub puzzle_elo: i32,
    /// Best puzzle rush score.
    pub puzzle_rush_best: u32,
    /// Puzzle rushes played.
    pub puzzle_rush_attempts: u32,
    /// Best puzzle rush pieces-per-second, times 100.
    pub puzzle_rush_pps: u32,
    /// Ranked queue may pair with bots.
    pub allow_bot_opponents: bool,
    /// Last time seen online.
    pub last_online: DateTime<Utc>,
    /// Newest first.
    pub recent_games: Vec<RecentGame>,
}

impl UserRecord {
    /// Fresh record.
    pub fn new(userid: impl Into<UserId>, username: impl Into<String>, is_bot: bool) -> Self {
        Self {
            userid: userid.into(),
            username: username.into(),
            is_bot,
            xp: 0,
            trophies: TROPHIES_UNSET,
            highest_trophies: 0,
            matches_played: 0,
            wins: 0,
            losses: 0,
            highest_score: 0,
            highest_level: 0,
            highest_lines: 0,
            games_played: 0,
            puzzle_elo: 0,
            puzzle_rush_best: 0,
            puzzle_rush_attempts: 0,
            puzzle_rush_pps: 0,
            allow_bot_opponents: true,
            last_online: Utc::now(),
            recent_games: Vec::new(),
        }
    }

    /// Trophies with the unset marker treated as zero.
    pub fn effective_trophies(&self) -> i32 {
        self.trophies.max(0)
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &UserEvent) -> Result<(), StoreError> {
        match event {
            UserEvent::Online => {
                self.last_online = Utc::now();
            }
            UserEvent::UpdateAttribute(attr) => match attr {
                UserAttribute::AllowBotOpponents(allow) => self.allow_bot_opponents = *allow,
                UserAttribute::Username(name) => {
                    if name.trim().is_empty() {
                        return Err(StoreError::AlterRejected("empty username".to_string()));
                    }
                    self.username = name.clone();
                }
            },
            UserEvent::SetInitialTrophies { trophies } => {
                if self.trophies != TROPHIES_UNSET {
                    return Err(StoreError::AlterRejected(
                        "initial trophies already chosen".to_string(),
                    ));
                }
                self.trophies = (*trophies).max(0);
                self.highest_trophies = self.highest_trophies.max(self.trophies);
            }
            UserEvent::GameEnd {
                game_id,
                score,
                level,
                lines,
                xp_gained,
                solo,
                ..
            } => {
                self.games_played += 1;
                self.xp += u64::from(*xp_gained);
                self.highest_score = self.highest_score.max(*score);
                self.highest_level = self.highest_level.max(*level);
                self.highest_lines = self.highest_lines.max(*lines);
                if *solo {
                    self.recent_games.insert(
                        0,
                        RecentGame {
                            game_id: game_id.clone(),
                            score: *score,
                            xp_gained: *xp_gained,
                        },
                    );
                    self.recent_games.truncate(RECENT_GAMES);
                }
            }
            UserEvent::PuzzleSubmit { new_elo, xp, .. } => {
                self.puzzle_elo = *new_elo;
                self.xp += u64::from(*xp);
            }
            UserEvent::PuzzleRush { xp, score, pps, .. } => {
                self.xp += u64::from(*xp);
                self.puzzle_rush_attempts += 1;
                self.puzzle_rush_best = self.puzzle_rush_best.max(*score);
                let pps = (pps * 100.0).round().max(0.0) as u32;
                self.puzzle_rush_pps = self.puzzle_rush_pps.max(pps);
            }
            UserEvent::RankedMatchEnd {
                xp_gained,
                win,
                lose,
                trophy_change,
            } => {
                self.xp += u64::from(*xp_gained);
                self.trophies = (self.effective_trophies() + trophy_change).max(0);
                self.highest_trophies = self.highest_trophies.max(self.trophies);
                self.matches_played += 1;
                if *win {
                    self.wins += 1;
                }
                if *lose {
                    self.losses += 1;
                }
            }
        }
        Ok(())
    }
}

/// Attribute a user can change directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAttribute {
    /// Ranked queue may pair with bots.
    AllowBotOpponents(bool),
    /// Display name.
    Username(String),
}

/// Alteration applied through [`super::UserStore::alter`].
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// Touch `last_online`.
    Online,
    /// Change an attribute.
    UpdateAttribute(UserAttribute),
    /// Choose a starting bracket; rejected once chosen.
    SetInitialTrophies {
        /// Bracket trophies.
        trophies: i32,
    },
    /// A game finished.
    GameEnd {
        /// Game id.
        game_id: String,
        /// Final score.
        score: u32,
        /// Final level.
        level: u8,
        /// Lines cleared.
        lines: u16,
        /// Four-line clears.
        tetris_count: u16,
        /// XP awarded.
        xp_gained: u32,
        /// Solo games are kept in the recent list.
        solo: bool,
    },
    /// Single puzzle solved or missed.
    PuzzleSubmit {
        /// Rating after the attempt.
        new_elo: i32,
        /// Whether it was solved.
        is_correct: bool,
        /// XP awarded.
        xp: u32,
    },
    /// Puzzle rush finished.
    PuzzleRush {
        /// XP awarded.
        xp: u32,
        /// Puzzles solved.
        score: u32,
        /// Seconds played.
        seconds: u32,
        /// Pieces per second.
        pps: f64,
    },
    /// Ranked match settled.
    RankedMatchEnd {
        /// XP awarded.
        xp_gained: u32,
        /// Player won.
        win: bool,
        /// Player lost.
        lose: bool,
        /// Signed trophy change.
        trophy_change: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_trophies_only_once() {
        let mut user = UserRecord::new("u1", "alice", false);
        user.apply(&UserEvent::SetInitialTrophies { trophies: 1200 }).unwrap();
        assert_eq!(user.trophies, 1200);
        assert_eq!(user.highest_trophies, 1200);

        let err = user.apply(&UserEvent::SetInitialTrophies { trophies: 2000 });
        assert!(matches!(err, Err(StoreError::AlterRejected(_))));
        assert_eq!(user.trophies, 1200);
    }

    #[test]
    fn test_ranked_match_end_clamps_at_zero() {
        let mut user = UserRecord::new("u1", "alice", false);
        user.apply(&UserEvent::SetInitialTrophies { trophies: 10 }).unwrap();
        user.apply(&UserEvent::RankedMatchEnd {
            xp_gained: 0,
            win: false,
            lose: true,
            trophy_change: -40,
        })
        .unwrap();
        assert_eq!(user.trophies, 0);
        assert_eq!(user.highest_trophies, 10);
        assert_eq!(user.matches_played, 1);
        assert_eq!(user.losses, 1);
        assert_eq!(user.wins, 0);
    }

    #[test]
    fn test_solo_game_end_keeps_recent_list_capped() {
        let mut user = UserRecord::new("u1", "alice", false);
        for i in 0..15u32 {
            user.apply(&UserEvent::GameEnd {
                game_id: format!("g{i}"),
                score: i * 1000,
                level: 18,
                lines: 10,
                tetris_count: 0,
                xp_gained: 5,
                solo: true,
            })
            .unwrap();
        }
        assert_eq!(user.recent_games.len(), RECENT_GAMES);
        assert_eq!(user.recent_games[0].game_id, "g14");
        assert_eq!(user.highest_score, 14_000);
        assert_eq!(user.games_played, 15);
        assert_eq!(user.xp, 75);
    }

    #[test]
    fn test_puzzle_rush_tracks_best() {
        let mut user = UserRecord::new("u1", "alice", false);
        user.apply(&UserEvent::PuzzleRush { xp: 8, score: 10, seconds: 180, pps: 1.234 }).unwrap();
        user.apply(&UserEvent::PuzzleRush { xp: 1, score: 4, seconds: 95, pps: 0.5 }).unwrap();
        assert_eq!(user.puzzle_rush_best, 10);
        assert_eq!(user.puzzle_rush_pps, 123);
        assert_eq!(user.puzzle_rush_attempts, 2);
    }
}
