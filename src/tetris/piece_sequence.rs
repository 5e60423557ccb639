//! Gym-style piece randomizer.
//!
//! Every game in a multiplayer point shares a hex seed so both players see
//! the same pieces. The generator is the NES 16-bit LFSR with the spawn
//! counter and single reroll on repeats.

use thiserror::Error;

use super::tetromino::TetrominoType;
use crate::core::rng::DeterministicRng;

/// Bytes in a piece-sequence seed (hex string is twice as long).
pub const SEED_BYTES: usize = 3;

/// NES piece-table ids, used only for the reroll offset.
const SPAWN_IDS: [u8; 7] = [0x02, 0x07, 0x08, 0x0A, 0x0B, 0x0E, 0x12];

/// LFSR state used when a seed decodes to zero.
const DEFAULT_LFSR: u16 = 0x8988;

/// Seed parsing errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SeedError {
    /// Not valid hex.
    #[error("Seed is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// Wrong number of bytes.
    #[error("Seed must be {expected} bytes, got {actual}")]
    WrongLength {
        /// Required byte count.
        expected: usize,
        /// Decoded byte count.
        actual: usize,
    },
}

/// Deterministic piece sequence.
#[derive(Debug, Clone)]
pub struct PieceSequence {
    lfsr: u16,
    spawn_count: u8,
    previous: Option<TetrominoType>,
}

impl PieceSequence {
    /// Build from a hex seed such as `"a3f00c"`.
    pub fn from_seed(seed: &str) -> Result<Self, SeedError> {
        let bytes = hex::decode(seed)?;
        if bytes.len() != SEED_BYTES {
            return Err(SeedError::WrongLength {
                expected: SEED_BYTES,
                actual: bytes.len(),
            });
        }
        let lfsr = u16::from_be_bytes([bytes[0], bytes[1]]);
        Ok(Self {
            lfsr: if lfsr == 0 { DEFAULT_LFSR } else { lfsr },
            spawn_count: bytes[2],
            previous: None,
        })
    }

    /// Fresh random seed string.
    pub fn random_seed(rng: &mut DeterministicRng) -> String {
        let value = rng.next_u32().to_be_bytes();
        hex::encode(&value[..SEED_BYTES])
    }

    fn step(&mut self) {
        let bit = ((self.lfsr >> 9) ^ (self.lfsr >> 1)) & 1;
        self.lfsr = (bit << 15) | (self.lfsr >> 1);
    }

    /// Next piece in the sequence.
    pub fn next_piece(&mut self) -> TetrominoType {
        self.spawn_count = self.spawn_count.wrapping_add(1);
        self.step();

        let high = (self.lfsr >> 8) as u8;
        let mut index = high.wrapping_add(self.spawn_count) & 7;

        let repeat = self
            .previous
            .map(|p| p.index() == index)
            .unwrap_or(false);

        if index == 7 || repeat {
            self.step();
            let offset = self
                .previous
                .map(|p| SPAWN_IDS[p.index() as usize])
                .unwrap_or(0);
            index = (((self.lfsr >> 8) as u8 & 7) + offset) % 7;
        }

        // index is always < 7 here
        let piece = TetrominoType::from_index(index).unwrap_or(TetrominoType::T);
        self.previous = Some(piece);
        piece
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = PieceSequence::from_seed("12abef").unwrap();
        let mut b = PieceSequence::from_seed("12abef").unwrap();
        for _ in 0..500 {
            assert_eq!(a.next_piece(), b.next_piece());
        }
    }

    #[test]
    fn test_all_pieces_appear() {
        let mut seq = PieceSequence::from_seed("00ff10").unwrap();
        let mut seen = [false; 7];
        for _ in 0..700 {
            seen[seq.next_piece().index() as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_bad_seeds() {
        assert!(matches!(
            PieceSequence::from_seed("zz0000"),
            Err(SeedError::InvalidHex(_))
        ));
        assert!(matches!(
            PieceSequence::from_seed("abcd"),
            Err(SeedError::WrongLength { actual: 2, .. })
        ));
    }

    #[test]
    fn test_random_seed_parses() {
        let mut rng = DeterministicRng::new(8);
        for _ in 0..20 {
            let seed = PieceSequence::random_seed(&mut rng);
            assert_eq!(seed.len(), SEED_BYTES * 2);
            assert!(PieceSequence::from_seed(&seed).is_ok());
        }
    }
}
