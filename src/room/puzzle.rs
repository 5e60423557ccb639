//! Puzzle sets for puzzle rush and puzzle battles.
//!
//! A puzzle is a board plus two pieces; the answer is the pair of final
//! poses. Attempts are checked in either order, since placing the next piece
//! first often leads to the same board.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{derive_seed, DeterministicRng};
use crate::tetris::analysis::ranked_placements;
use crate::tetris::{MtPose, TetrisBoard, TetrominoType, BOARD_COLS, BOARD_ROWS};

/// Puzzle source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PuzzleError {
    /// The source produced no puzzles.
    #[error("Puzzle set is empty")]
    EmptySet,
    /// Backend failure.
    #[error("Puzzle source unavailable: {0}")]
    Unavailable(String),
}

/// One puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RushPuzzle {
    /// Puzzle id.
    pub id: String,
    /// Starting board.
    pub board: TetrisBoard,
    /// Piece to place first.
    pub current_type: TetrominoType,
    /// Piece to place second.
    pub next_type: TetrominoType,
    /// Encoded answer for the first piece.
    pub current: u32,
    /// Encoded answer for the second piece.
    pub next: u32,
}

impl RushPuzzle {
    /// True if the attempt matches the answer in either order.
    pub fn is_correct(&self, current: Option<u32>, next: Option<u32>) -> bool {
        let (Some(a), Some(b)) = (current, next) else {
            return false;
        };
        (a == self.current && b == self.next) || (a == self.next && b == self.current)
    }
}

/// Ordered puzzles shared by everyone in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleSet {
    /// Key identifying the set.
    pub key: String,
    /// Puzzles in play order.
    pub puzzles: Vec<RushPuzzle>,
}

impl PuzzleSet {
    /// Puzzle at `index`, wrapping around.
    pub fn get(&self, index: usize) -> Option<&RushPuzzle> {
        if self.puzzles.is_empty() {
            return None;
        }
        self.puzzles.get(index % self.puzzles.len())
    }
}

/// Pack a pose into the attempt wire format.
pub fn encode_placement(pose: MtPose) -> u32 {
    (u32::from(pose.rotation) << 16) | (u32::from(pose.x as u8) << 8) | u32::from(pose.y as u8)
}

/// Inverse of [`encode_placement`].
pub fn decode_placement(code: u32) -> MtPose {
    MtPose {
        rotation: ((code >> 16) & 0xFF) as u8,
        x: ((code >> 8) & 0xFF) as u8 as i8,
        y: (code & 0xFF) as u8 as i8,
    }
}

/// Supplies puzzle sets.
#[async_trait]
pub trait PuzzleSource: Send + Sync {
    /// A fresh set for these players.
    async fn puzzle_set(&self, userids: &[String]) -> Result<PuzzleSet, PuzzleError>;
}

/// Generates solvable puzzles from a seed.
pub struct GeneratedPuzzleSource {
    set_size: usize,
    counter: AtomicU64,
}

impl GeneratedPuzzleSource {
    /// Source producing sets of `set_size` puzzles.
    pub fn new(set_size: usize) -> Self {
        Self {
            set_size,
            counter: AtomicU64::new(0),
        }
    }

    /// Deterministic set for a seed.
    pub fn generate(&self, seed: u64) -> PuzzleSet {
        let mut rng = DeterministicRng::new(seed);
        let mut puzzles = Vec::with_capacity(self.set_size);
        let mut attempts = 0;
        while puzzles.len() < self.set_size && attempts < self.set_size * 4 {
            attempts += 1;
            if let Some(puzzle) = generate_puzzle(&mut rng, puzzles.len()) {
                puzzles.push(puzzle);
            }
        }
        PuzzleSet {
            key: format!("{:016x}", seed),
            puzzles,
        }
    }
}

impl Default for GeneratedPuzzleSource {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl PuzzleSource for GeneratedPuzzleSource {
    async fn puzzle_set(&self, userids: &[String]) -> Result<PuzzleSet, PuzzleError> {
        let nonce = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut parts: Vec<&[u8]> = userids.iter().map(|u| u.as_bytes()).collect();
        let nonce_bytes = nonce.to_le_bytes();
        parts.push(&nonce_bytes);
        let set = self.generate(derive_seed("puzzle_set", &parts));
        if set.puzzles.is_empty() {
            return Err(PuzzleError::EmptySet);
        }
        Ok(set)
    }
}

fn generate_puzzle(rng: &mut DeterministicRng, index: usize) -> Option<RushPuzzle> {
    let mut board = TetrisBoard::new();
    let rows = rng.next_int_range(3, 8) as usize;
    for y in (BOARD_ROWS - rows)..BOARD_ROWS {
        let gap = rng.next_int(BOARD_COLS as u32) as usize;
        for x in 0..BOARD_COLS {
            if x != gap && rng.chance(0.85) {
                board.set(x, y, 1 + rng.next_int(3) as u8);
            }
        }
    }
    // Settle floating cells so the board looks played
    let mut settled = TetrisBoard::new();
    for x in 0..BOARD_COLS {
        let mut write = BOARD_ROWS;
        for y in (0..BOARD_ROWS).rev() {
            let cell = board.get(x, y);
            if cell != 0 {
                write -= 1;
                settled.set(x, write, cell);
            }
        }
    }
    // Settling packs the bottom rows; punch one hole in any that filled up
    for y in settled.full_rows() {
        let hole = rng.next_int(BOARD_COLS as u32) as usize;
        settled.set(hole, y, 0);
    }

    let current_type = TetrominoType::ALL[rng.next_int(7) as usize];
    let next_type = TetrominoType::ALL[rng.next_int(7) as usize];
    let best = ranked_placements(&settled, current_type, Some(next_type))
        .into_iter()
        .next()?;
    let second = best.second?;

    Some(RushPuzzle {
        id: format!("p{:03}-{:08x}", index, rng.next_u32()),
        board: settled,
        current_type,
        next_type,
        current: encode_placement(best.first),
        next: encode_placement(second),
    })
}
