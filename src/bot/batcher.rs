//! Packet batching.
//!
//! A playing client emits a handful of packets per frame. Bots collect them
//! and ship one binary frame per flush interval, the same cadence a browser
//! client uses.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::network::packet::{Packet, PacketAssembler};

/// Default flush cadence.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Collects packets until the next flush.
#[derive(Debug)]
pub struct PacketBatcher {
    assembler: PacketAssembler,
    interval: Duration,
    last_flush: Instant,
}

impl PacketBatcher {
    /// Batcher flushing every `interval`, starting now.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Batcher whose first flush is due `interval` after `start`.
    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            assembler: PacketAssembler::new(),
            interval,
            last_flush: start,
        }
    }

    /// Queue a packet.
    pub fn push(&mut self, packet: &Packet) {
        if let Err(err) = self.assembler.push(packet) {
            warn!(opcode = ?packet.opcode(), error = %err, "Dropping unencodable packet");
        }
    }

    /// Packets queued since the last flush.
    pub fn pending(&self) -> usize {
        self.assembler.len()
    }

    /// The batched frame, if the interval has elapsed and anything is queued.
    pub fn flush_if_due(&mut self, now: Instant) -> Option<Vec<u8>> {
        if now.duration_since(self.last_flush) < self.interval {
            return None;
        }
        self.last_flush = now;
        self.take()
    }

    /// Everything still queued, regardless of the interval.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.take()
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        if self.assembler.is_empty() {
            return None;
        }
        Some(self.assembler.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::PacketDisassembler;
    use crate::tetris::TetrominoType;

    #[test]
    fn test_flushes_on_interval_only() {
        let start = Instant::now();
        let mut batcher = PacketBatcher::starting_at(DEFAULT_FLUSH_INTERVAL, start);
        batcher.push(&Packet::GameStart {
            level: 18,
            current: TetrominoType::T,
            next: TetrominoType::I,
        });
        batcher.push(&Packet::Countdown { delta_ms: 16, countdown: 3 });
        assert_eq!(batcher.pending(), 2);

        assert!(batcher.flush_if_due(start + Duration::from_millis(100)).is_none());
        let frame = batcher
            .flush_if_due(start + Duration::from_millis(260))
            .unwrap();
        let packets = PacketDisassembler::new(&frame).collect_all().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(batcher.pending(), 0);

        // Nothing queued, nothing sent
        assert!(batcher.flush_if_due(start + Duration::from_millis(600)).is_none());
    }

    #[test]
    fn test_finish_sends_remainder() {
        let mut batcher = PacketBatcher::new(DEFAULT_FLUSH_INTERVAL);
        batcher.push(&Packet::GameEnd);
        let frame = batcher.finish().unwrap();
        assert_eq!(
            PacketDisassembler::new(&frame).collect_all().unwrap(),
            vec![Packet::GameEnd]
        );
        assert!(batcher.finish().is_none());
    }
}
