//! Trophy rating math.
//!
//! Trophy changes are computed when a match is found, before anything is
//! played, and shown to both players. Settlement later picks the gain, the
//! loss, or the rounded average (draw).

use serde::{Deserialize, Serialize};

/// Rating spread for a 10x expected-score ratio.
const RATING_SCALE: f64 = 800.0;

/// Matches a bot is treated as having played at minimum.
const BOT_MIN_MATCHES: u32 = 3;

/// Precomputed change for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrophyDelta {
    /// Change on a win. Always positive.
    pub trophy_gain: i32,
    /// Change on a loss. Always negative.
    pub trophy_loss: i32,
}

/// Outcome of a settled match from one player's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Won.
    Win,
    /// Lost.
    Loss,
    /// Drew.
    Draw,
}

impl TrophyDelta {
    /// Signed change for an outcome.
    pub fn change_for(&self, result: MatchResult) -> i32 {
        match result {
            MatchResult::Win => self.trophy_gain,
            MatchResult::Loss => self.trophy_loss,
            MatchResult::Draw => round_half_up(f64::from(self.trophy_gain + self.trophy_loss) / 2.0),
        }
    }
}

/// Rating inputs for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatedPlayer {
    /// Current trophies.
    pub trophies: i32,
    /// Ranked matches played.
    pub matches_played: u32,
    /// Bots are never treated as provisional.
    pub is_bot: bool,
}

/// Halves round toward positive infinity.
pub fn round_half_up(x: f64) -> i32 {
    (x + 0.5).floor() as i32
}

/// Expected score of `player` against `opponent`.
pub fn expected_score(player: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - player) / RATING_SCALE))
}

/// K-factor. Large for new players and decaying toward 30.
pub fn k_factor(matches_played: u32) -> f64 {
    300.0 / (f64::from(matches_played) + 2.5) + 30.0
}

/// Gain and loss for `player` facing an opponent with `opponent_trophies`.
pub fn calculate_trophy_delta(player: RatedPlayer, opponent_trophies: i32) -> TrophyDelta {
    let matches = if player.is_bot {
        player.matches_played.max(BOT_MIN_MATCHES)
    } else {
        player.matches_played
    };
    let k = k_factor(matches);
    let expected = expected_score(player.trophies, opponent_trophies);

    // Extreme gaps round to zero; a win must still be worth something
    let trophy_gain = round_half_up(k * (1.0 - expected)).max(1);
    let trophy_loss = round_half_up(k * (0.0 - expected)).min(-1);

    TrophyDelta {
        trophy_gain,
        trophy_loss,
    }
}

/// Start level for a ranked match, chosen by the lower trophy count.
pub fn start_level_for_trophies(min_trophies: i32) -> u8 {
    match min_trophies {
        t if t < 600 => 6,
        t if t < 1000 => 9,
        t if t < 1400 => 12,
        t if t < 1800 => 15,
        _ => 18,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn human(trophies: i32, matches_played: u32) -> RatedPlayer {
        RatedPlayer {
            trophies,
            matches_played,
            is_bot: false,
        }
    }

    #[test]
    fn test_even_match() {
        let delta = calculate_trophy_delta(human(1000, 0), 1000);
        // K = 300/2.5 + 30 = 150, E = 0.5
        assert_eq!(delta.trophy_gain, 75);
        assert_eq!(delta.trophy_loss, -75);
        assert_eq!(delta.change_for(MatchResult::Draw), 0);
    }

    #[test]
    fn test_bots_are_not_provisional() {
        let bot = RatedPlayer {
            trophies: 1000,
            matches_played: 0,
            is_bot: true,
        };
        let bot_delta = calculate_trophy_delta(bot, 1000);
        let seasoned = calculate_trophy_delta(human(1000, 3), 1000);
        assert_eq!(bot_delta, seasoned);
    }

    #[test]
    fn test_draw_rounds_half_up() {
        let delta = TrophyDelta {
            trophy_gain: 10,
            trophy_loss: -15,
        };
        // -2.5 rounds to -2
        assert_eq!(delta.change_for(MatchResult::Draw), -2);
        let delta = TrophyDelta {
            trophy_gain: 15,
            trophy_loss: -10,
        };
        assert_eq!(delta.change_for(MatchResult::Draw), 3);
    }

    #[test]
    fn test_start_levels() {
        assert_eq!(start_level_for_trophies(0), 6);
        assert_eq!(start_level_for_trophies(599), 6);
        assert_eq!(start_level_for_trophies(600), 9);
        assert_eq!(start_level_for_trophies(1000), 12);
        assert_eq!(start_level_for_trophies(1399), 12);
        assert_eq!(start_level_for_trophies(1400), 15);
        assert_eq!(start_level_for_trophies(1800), 18);
        assert_eq!(start_level_for_trophies(9000), 18);
    }

    #[test]
    fn test_expected_score_symmetry() {
        let a = expected_score(1400, 1000);
        let b = expected_score(1000, 1400);
        assert!((a + b - 1.0).abs() < 1e-12);
        assert!(a > 0.5);
    }

    proptest! {
        #[test]
        fn prop_delta_favors_winner(
            me in 0i32..6000,
            them in 0i32..6000,
            matches in 0u32..500,
            is_bot in any::<bool>(),
        ) {
            let delta = calculate_trophy_delta(
                RatedPlayer { trophies: me, matches_played: matches, is_bot },
                them,
            );
            prop_assert!(delta.trophy_gain > 0);
            prop_assert!(delta.trophy_loss < 0);
            let draw = delta.change_for(MatchResult::Draw);
            prop_assert!(draw <= delta.trophy_gain && draw >= delta.trophy_loss);
        }

        #[test]
        fn prop_higher_rated_gains_less(
            base in 0i32..4000,
            gap in 1i32..2000,
            matches in 0u32..200,
        ) {
            let strong = calculate_trophy_delta(human(base + gap, matches), base);
            let weak = calculate_trophy_delta(human(base, matches), base + gap);
            prop_assert!(strong.trophy_gain <= weak.trophy_gain);
            prop_assert!(strong.trophy_loss <= weak.trophy_loss);
        }
    }
}
