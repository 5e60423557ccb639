//! Core primitives shared by every subsystem.
//!
//! The seeded PRNG lives here: game rules are in `tetris`, and all
//! randomness (bots, seeds, puzzle sets) flows through [`DeterministicRng`].

pub mod rng;

pub use rng::{derive_seed, DeterministicRng};

/// Parse an environment variable, `None` if unset or unparsable.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Environment variable as milliseconds.
pub fn env_millis(key: &str) -> Option<std::time::Duration> {
    env_parse::<u64>(key).map(std::time::Duration::from_millis)
}

/// Environment variable as a boolean (`1`/`true`).
pub fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
