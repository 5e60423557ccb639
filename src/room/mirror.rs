//! Observer-side mirror of relayed game streams.
//!
//! Spectators and bots receive every player's frames prefixed with the slot
//! byte. The mirror keeps one [`GamePlayer`] per slot. When a stream turns
//! out inconsistent it asks for a RECOVERY on a fixed schedule until one
//! arrives; spectators that exhaust the schedule are told to resync.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::game_player::GamePlayer;
use crate::network::packet::{decode_slot_frame, Packet, PacketError};

/// What the owner of a mirror should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Send REQUEST_RECOVERY for the slot.
    RequestRecovery,
    /// Give up on the stream and resubscribe from scratch.
    ForceResync,
}

/// Bounded recovery request schedule.
#[derive(Debug, Clone)]
pub struct RecoveryRetry {
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    next_at: Option<Instant>,
}

impl RecoveryRetry {
    /// Idle schedule.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            attempts: 0,
            next_at: None,
        }
    }

    /// Start requesting, first request due immediately. No-op if running.
    pub fn start(&mut self, now: Instant) {
        if self.next_at.is_none() {
            self.attempts = 0;
            self.next_at = Some(now);
        }
    }

    /// Stop requesting.
    pub fn stop(&mut self) {
        self.next_at = None;
        self.attempts = 0;
    }

    /// True while requests are scheduled.
    pub fn is_active(&self) -> bool {
        self.next_at.is_some()
    }

    /// Requests sent since the last start.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Action due at `now`, if any.
    ///
    /// Once `max_attempts` requests went unanswered for a full interval the
    /// schedule stops and `ForceResync` is returned.
    pub fn poll(&mut self, now: Instant) -> Option<RetryAction> {
        let due = self.next_at?;
        if now < due {
            return None;
        }
        if self.attempts >= self.max_attempts {
            self.stop();
            return Some(RetryAction::ForceResync);
        }
        self.attempts += 1;
        self.next_at = Some(now + self.interval);
        Some(RetryAction::RequestRecovery)
    }
}

struct SlotMirror {
    player: GamePlayer,
    retry: RecoveryRetry,
}

/// Mirror of every slot in a room.
pub struct GameMirror {
    slots: Vec<SlotMirror>,
    is_spectator: bool,
}

impl GameMirror {
    /// Mirror for `userids.len()` slots.
    pub fn new(userids: &[String], interval: Duration, max_attempts: u32, is_spectator: bool) -> Self {
        Self {
            slots: userids
                .iter()
                .map(|u| SlotMirror {
                    player: GamePlayer::new(u.clone()),
                    retry: RecoveryRetry::new(interval, max_attempts),
                })
                .collect(),
            is_spectator,
        }
    }

    /// Apply a relayed frame. Returns the slot it belonged to.
    pub fn handle_relayed(&mut self, data: &[u8], now: Instant) -> Result<u8, PacketError> {
        let (slot, packets) = decode_slot_frame(data)?;
        let Some(mirror) = self.slots.get_mut(slot as usize) else {
            warn!(slot, "Relayed frame for unknown slot");
            return Ok(slot);
        };

        for packet in packets {
            let result = match packet {
                Ok(packet) => {
                    let is_recovery = matches!(packet, Packet::Recovery(_));
                    mirror.player.handle_packet(&packet).map(|_| is_recovery)
                }
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(true) => {
                    if mirror.retry.is_active() {
                        debug!(slot, "Stream recovered");
                    }
                    mirror.retry.stop();
                }
                Ok(false) => {}
                Err(err) => {
                    if !mirror.retry.is_active() {
                        debug!(slot, error = %err, "Stream inconsistent, requesting recovery");
                    }
                    mirror.retry.start(now);
                    break;
                }
            }
        }
        Ok(slot)
    }

    /// Due retry actions per slot. Players never force a resync; their
    /// schedule simply stops.
    pub fn poll(&mut self, now: Instant) -> Vec<(u8, RetryAction)> {
        let is_spectator = self.is_spectator;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match slot.retry.poll(now)? {
                RetryAction::ForceResync if !is_spectator => None,
                action => Some((i as u8, action)),
            })
            .collect()
    }

    /// Reconstructed player for a slot.
    pub fn player(&self, slot: usize) -> Option<&GamePlayer> {
        self.slots.get(slot).map(|s| &s.player)
    }

    /// Last topout score of a slot.
    pub fn topout_score(&self, slot: usize) -> Option<u32> {
        self.player(slot).and_then(|p| p.topout_score())
    }

    /// True if any slot is waiting for a recovery.
    pub fn is_recovering(&self) -> bool {
        self.slots.iter().any(|s| s.retry.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::{encode_slot_frame, PacketAssembler};
    use crate::tetris::{MtPose, TetrominoType};

    fn relayed(slot: u8, packets: &[Packet]) -> Vec<u8> {
        let mut assembler = PacketAssembler::new();
        for p in packets {
            assembler.push(p).unwrap();
        }
        encode_slot_frame(slot, &assembler.take())
    }

    fn create_test_mirror(is_spectator: bool) -> GameMirror {
        GameMirror::new(
            &["p1".to_string(), "p2".to_string()],
            Duration::from_millis(3000),
            3,
            is_spectator,
        )
    }

    fn start() -> Packet {
        Packet::GameStart {
            level: 18,
            current: TetrominoType::T,
            next: TetrominoType::I,
        }
    }

    #[test]
    fn test_retry_schedule() {
        let t0 = Instant::now();
        let mut retry = RecoveryRetry::new(Duration::from_millis(3000), 3);
        assert_eq!(retry.poll(t0), None);

        retry.start(t0);
        assert_eq!(retry.poll(t0), Some(RetryAction::RequestRecovery));
        assert_eq!(retry.poll(t0 + Duration::from_millis(2999)), None);
        assert_eq!(
            retry.poll(t0 + Duration::from_millis(3000)),
            Some(RetryAction::RequestRecovery)
        );
        assert_eq!(
            retry.poll(t0 + Duration::from_millis(6000)),
            Some(RetryAction::RequestRecovery)
        );
        assert_eq!(retry.attempts(), 3);
        assert_eq!(
            retry.poll(t0 + Duration::from_millis(9000)),
            Some(RetryAction::ForceResync)
        );
        assert!(!retry.is_active());
    }

    #[test]
    fn test_error_starts_retry_and_recovery_stops_it() {
        let t0 = Instant::now();
        let mut mirror = create_test_mirror(true);

        // Placement with no START seen
        let bad = relayed(
            1,
            &[Packet::Placement {
                next_next: TetrominoType::O,
                pose: MtPose { rotation: 0, x: 5, y: 18 },
                pushdown: 0,
            }],
        );
        assert_eq!(mirror.handle_relayed(&bad, t0).unwrap(), 1);
        assert!(mirror.is_recovering());
        assert_eq!(mirror.poll(t0), vec![(1, RetryAction::RequestRecovery)]);

        let mut source = GamePlayer::new("p2");
        source.handle_packet(&start()).unwrap();
        let recovery = relayed(1, &[source.recovery_packet()]);
        mirror.handle_relayed(&recovery, t0).unwrap();
        assert!(!mirror.is_recovering());
        assert!(mirror.player(1).unwrap().is_in_game());
    }

    #[test]
    fn test_player_gives_up_quietly() {
        let t0 = Instant::now();
        let mut mirror = create_test_mirror(false);
        mirror
            .handle_relayed(&relayed(0, &[Packet::GameEnd]), t0)
            .unwrap();
        for i in 0..3 {
            let at = t0 + Duration::from_millis(3000 * i);
            assert_eq!(mirror.poll(at), vec![(0, RetryAction::RequestRecovery)]);
        }
        assert!(mirror.poll(t0 + Duration::from_millis(9000)).is_empty());
        assert!(!mirror.is_recovering());
    }

    #[test]
    fn test_topout_score_tracked() {
        let t0 = Instant::now();
        let mut mirror = create_test_mirror(false);
        mirror
            .handle_relayed(&relayed(0, &[start(), Packet::GameEnd]), t0)
            .unwrap();
        assert_eq!(mirror.topout_score(0), Some(0));
        assert_eq!(mirror.topout_score(1), None);
    }
}
