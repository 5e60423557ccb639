//! Bot roster.
//!
//! The manager owns the list of bot accounts, makes sure each exists in the
//! user store with its tier's trophies, and runs one [`RankedBotUser`] task
//! per account.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use super::evaluator::Evaluator;
use super::placement_ai::{AiConfig, InputSpeed};
use super::ranked_bot::RankedBotUser;
use super::BotConfig;
use crate::context::ServerContext;
use crate::core::DeterministicRng;
use crate::user::UserRecord;

/// One skill bracket of bots.
#[derive(Debug, Clone, PartialEq)]
pub struct BotTier {
    /// Trophies the accounts are seeded with.
    pub trophies: i32,
    /// Best score the accounts are seeded with.
    pub highest_score: u32,
    /// Input speeds present in the tier.
    pub speeds: &'static [InputSpeed],
    /// Chance of a slightly worse placement.
    pub inaccuracy: f64,
    /// Chance of a clearly worse placement.
    pub mistake: f64,
    /// Chance of a stray input.
    pub misdrop: f64,
    /// Accounts per input speed.
    pub per_speed: usize,
}

/// Three tiers, three bots per input speed.
pub const DEFAULT_ROSTER: &[BotTier] = &[
    BotTier {
        trophies: 400,
        highest_score: 80_000,
        speeds: &[InputSpeed::Hz5, InputSpeed::Hz6],
        inaccuracy: 0.1,
        mistake: 0.05,
        misdrop: 0.02,
        per_speed: 3,
    },
    BotTier {
        trophies: 1200,
        highest_score: 300_000,
        speeds: &[InputSpeed::Hz8, InputSpeed::Hz10],
        inaccuracy: 0.06,
        mistake: 0.03,
        misdrop: 0.01,
        per_speed: 3,
    },
    BotTier {
        trophies: 2000,
        highest_score: 800_000,
        speeds: &[InputSpeed::Hz10, InputSpeed::Hz12, InputSpeed::Hz15],
        inaccuracy: 0.03,
        mistake: 0.01,
        misdrop: 0.005,
        per_speed: 3,
    },
];

const BOT_NAMES: &[&str] = &[
    "Hexfall",
    "Quadra",
    "Stackrat",
    "Linebreaker",
    "Wellspring",
    "Overhang",
    "Spintop",
    "Burnside",
    "Dasher",
    "Tuckmaster",
    "Kickback",
    "Slabwright",
];

/// Display name for the `index`th bot; names repeat with a suffix.
fn bot_name(index: usize) -> String {
    let base = BOT_NAMES[index % BOT_NAMES.len()];
    match index / BOT_NAMES.len() {
        0 => base.to_string(),
        round => format!("{base}{}", round + 1),
    }
}

/// A bot account and how it plays.
#[derive(Debug, Clone, PartialEq)]
pub struct BotAccount {
    /// User id, `bot-<trophies>-<n>`.
    pub userid: String,
    /// Display name.
    pub username: String,
    /// Seeded trophies.
    pub trophies: i32,
    /// Seeded best score.
    pub highest_score: u32,
    /// Placement behavior.
    pub ai: AiConfig,
}

/// Builds and runs the bot roster.
pub struct BotManager {
    ctx: Arc<ServerContext>,
    config: BotConfig,
    evaluator: Arc<dyn Evaluator>,
    roster: Vec<BotTier>,
}

impl BotManager {
    /// Manager for the default roster.
    pub fn new(ctx: Arc<ServerContext>, config: BotConfig, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            ctx,
            config,
            evaluator,
            roster: DEFAULT_ROSTER.to_vec(),
        }
    }

    /// Replace the roster.
    pub fn with_roster(mut self, roster: Vec<BotTier>) -> Self {
        self.roster = roster;
        self
    }

    /// Every account the roster describes.
    pub fn accounts(&self) -> Vec<BotAccount> {
        let mut accounts = Vec::new();
        for tier in &self.roster {
            let mut n = 0;
            for &input_speed in tier.speeds {
                for _ in 0..tier.per_speed {
                    n += 1;
                    accounts.push(BotAccount {
                        userid: format!("bot-{}-{}", tier.trophies, n),
                        username: bot_name(accounts.len()),
                        trophies: tier.trophies,
                        highest_score: tier.highest_score,
                        ai: AiConfig {
                            input_speed,
                            inaccuracy: tier.inaccuracy,
                            mistake: tier.mistake,
                            misdrop: tier.misdrop,
                        },
                    });
                }
            }
        }
        accounts
    }

    /// Create missing bot records. Existing records keep their progress.
    pub async fn register_accounts(&self) -> Vec<BotAccount> {
        let accounts = self.accounts();
        for account in &accounts {
            let mut record = UserRecord::new(&account.userid, &account.username, true);
            record.trophies = account.trophies;
            record.highest_trophies = account.trophies;
            record.highest_score = account.highest_score;
            self.ctx.users().get_or_create(record).await;
        }
        accounts
    }

    /// Register the roster and start one task per bot. Does nothing when
    /// bots are disabled.
    pub async fn spawn_all(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Bots disabled");
            return Vec::new();
        }
        let accounts = self.register_accounts().await;
        info!(count = accounts.len(), "Starting bots");
        accounts
            .into_iter()
            .map(|account| {
                let bot = RankedBotUser::new(
                    Arc::clone(&self.ctx),
                    account.userid,
                    account.username,
                    account.ai,
                    Arc::clone(&self.evaluator),
                    self.config.clone(),
                    DeterministicRng::from_entropy(),
                );
                tokio::spawn(bot.run(shutdown.subscribe()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::bot::evaluator::HeuristicEvaluator;
    use crate::context::test_support::create_test_context;
    use crate::matchmaking::MatchmakingConfig;

    fn manager(config: BotConfig) -> BotManager {
        BotManager::new(
            create_test_context(MatchmakingConfig::default()),
            config,
            Arc::new(HeuristicEvaluator),
        )
    }

    #[test]
    fn test_default_roster_accounts() {
        let accounts = manager(BotConfig::default()).accounts();
        assert_eq!(accounts.len(), 21);

        let ids: HashSet<_> = accounts.iter().map(|a| a.userid.as_str()).collect();
        assert_eq!(ids.len(), 21);
        let names: HashSet<_> = accounts.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names.len(), 21);

        assert_eq!(accounts[0].userid, "bot-400-1");
        assert_eq!(accounts[0].ai.input_speed, InputSpeed::Hz5);
        assert_eq!(accounts[2].ai.input_speed, InputSpeed::Hz5);
        assert_eq!(accounts[3].ai.input_speed, InputSpeed::Hz6);
        assert_eq!(accounts[6].userid, "bot-1200-1");
        assert_eq!(accounts[20].userid, "bot-2000-9");
        assert_eq!(accounts[20].ai.input_speed, InputSpeed::Hz15);
        assert_eq!(accounts[12].username, "Hexfall2");
    }

    #[tokio::test]
    async fn test_register_seeds_trophies_once() {
        let manager = manager(BotConfig::default());
        manager.register_accounts().await;
        let users = manager.ctx.users();
        let record = users.get("bot-1200-2").await.unwrap();
        assert!(record.is_bot);
        assert_eq!(record.trophies, 1200);
        assert_eq!(record.highest_score, 300_000);

        // Progress survives re-registration
        let mut changed = record.clone();
        changed.trophies = 1234;
        users.remove("bot-1200-2").await.unwrap();
        users.get_or_create(changed).await;
        manager.register_accounts().await;
        assert_eq!(users.get("bot-1200-2").await.unwrap().trophies, 1234);
    }

    #[tokio::test]
    async fn test_disabled_spawns_nothing() {
        let (tx, _) = broadcast::channel(1);
        assert!(manager(BotConfig::default()).spawn_all(&tx).await.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_bots_stop_on_shutdown() {
        let config = BotConfig {
            enabled: true,
            warmup: (Duration::from_secs(600), Duration::from_secs(600)),
            ..BotConfig::default()
        };
        let manager = manager(config).with_roster(vec![BotTier {
            speeds: &[InputSpeed::Hz5],
            per_speed: 2,
            ..DEFAULT_ROSTER[0].clone()
        }]);
        let (tx, _) = broadcast::channel(1);
        let handles = manager.spawn_all(&tx).await;
        assert_eq!(handles.len(), 2);

        tx.send(()).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
