//! Abort tracking and ranked suspensions.
//!
//! Each abort is remembered for the abort window. Hitting the warn threshold
//! sends a warning, hitting the suspend threshold suspends the user from the
//! ranked queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::info;

use super::MatchmakingConfig;
use crate::network::protocol::{NotificationType, ServerMessage};
use crate::network::session::SessionDirectory;
use crate::user::UserId;

const WARNING_MESSAGE: &str =
    "Please avoid aborting too often. Frequent aborts will be punished!";
const SUSPENDED_MESSAGE: &str = "You have been suspended from ranked mode for the next 30 minutes due to excessive aborts.";

/// Result of recording an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// Counted silently.
    Counted(usize),
    /// Counted and warned.
    Warned(usize),
    /// Suspension started.
    Suspended,
}

#[derive(Default)]
struct AbortState {
    aborts: HashMap<UserId, VecDeque<Instant>>,
    suspended_until: HashMap<UserId, Instant>,
}

/// Per-user abort counts with a decaying window.
pub struct AbortCounter {
    window: Duration,
    warn_threshold: usize,
    suspend_threshold: usize,
    suspension: Duration,
    directory: Arc<SessionDirectory>,
    state: Mutex<AbortState>,
}

impl AbortCounter {
    /// Counter using the matchmaking thresholds.
    pub fn new(config: &MatchmakingConfig, directory: Arc<SessionDirectory>) -> Self {
        Self {
            window: config.abort_window,
            warn_threshold: config.abort_warn_threshold,
            suspend_threshold: config.abort_suspend_threshold,
            suspension: config.suspension,
            directory,
            state: Mutex::new(AbortState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AbortState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn prune(window: Duration, aborts: &mut VecDeque<Instant>, now: Instant) {
        while aborts
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            aborts.pop_front();
        }
    }

    /// Record an abort now. Messages go to `session_id` if given, else to
    /// every session of the user.
    pub fn on_abort(&self, userid: &str, session_id: Option<&str>) -> AbortOutcome {
        self.on_abort_at(userid, session_id, Instant::now())
    }

    /// Record an abort at `now`.
    pub fn on_abort_at(&self, userid: &str, session_id: Option<&str>, now: Instant) -> AbortOutcome {
        let outcome = {
            let mut state = self.lock();
            // Drop users whose aborts have all expired
            let window = self.window;
            state.aborts.retain(|_, aborts| {
                Self::prune(window, aborts, now);
                !aborts.is_empty()
            });
            let aborts = state.aborts.entry(userid.to_string()).or_default();
            aborts.push_back(now);
            let count = aborts.len();

            if count >= self.suspend_threshold {
                state
                    .suspended_until
                    .insert(userid.to_string(), now + self.suspension);
                AbortOutcome::Suspended
            } else if count >= self.warn_threshold {
                AbortOutcome::Warned(count)
            } else {
                AbortOutcome::Counted(count)
            }
        };

        let message = match outcome {
            AbortOutcome::Counted(_) => None,
            AbortOutcome::Warned(_) => Some((NotificationType::Warning, WARNING_MESSAGE)),
            AbortOutcome::Suspended => {
                info!(userid = %userid, "Suspended from ranked for aborting");
                Some((NotificationType::Error, SUSPENDED_MESSAGE))
            }
        };
        if let Some((kind, text)) = message {
            let msg = ServerMessage::notify(kind, text);
            match session_id {
                Some(sid) => {
                    self.directory.send_to_session(sid, msg);
                }
                None => {
                    self.directory.send_to_user(userid, msg);
                }
            }
        }
        outcome
    }

    /// Aborts inside the window.
    pub fn abort_count_at(&self, userid: &str, now: Instant) -> usize {
        let mut state = self.lock();
        match state.aborts.get_mut(userid) {
            Some(aborts) => {
                Self::prune(self.window, aborts, now);
                let count = aborts.len();
                if count == 0 {
                    state.aborts.remove(userid);
                }
                count
            }
            None => 0,
        }
    }

    /// Remaining suspension at `now`.
    pub fn suspension_remaining_at(&self, userid: &str, now: Instant) -> Option<Duration> {
        let mut state = self.lock();
        let until = *state.suspended_until.get(userid)?;
        if until <= now {
            state.suspended_until.remove(userid);
            return None;
        }
        Some(until - now)
    }

    /// Message for a suspended user trying to join, `None` if not suspended.
    pub fn suspended_message(&self, userid: &str) -> Option<String> {
        self.suspended_message_at(userid, Instant::now())
    }

    /// [`Self::suspended_message`] at `now`.
    pub fn suspended_message_at(&self, userid: &str, now: Instant) -> Option<String> {
        let remaining = self.suspension_remaining_at(userid, now)?;
        let minutes = remaining.as_secs().div_ceil(60).max(1);
        Some(format!(
            "You are suspended from ranked mode for {} more minutes due to excessive aborts.",
            minutes
        ))
    }
}
