//! Tetromino types, rotation tables and poses.
//!
//! Rotation follows the classic NES system: no wall kicks, T/J/L have four
//! states, S/Z/I have two, O has one. A pose names the rotation state and the
//! board coordinates of the rotation pivot.

use serde::{Deserialize, Serialize};

use super::board::TetrisBoard;

/// The seven tetromino types, in NES piece-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TetrominoType {
    /// T piece.
    T,
    /// J piece.
    J,
    /// Z piece.
    Z,
    /// O piece.
    O,
    /// S piece.
    S,
    /// L piece.
    L,
    /// I piece.
    I,
}

impl TetrominoType {
    /// All types, in wire order.
    pub const ALL: [TetrominoType; 7] = [
        TetrominoType::T,
        TetrominoType::J,
        TetrominoType::Z,
        TetrominoType::O,
        TetrominoType::S,
        TetrominoType::L,
        TetrominoType::I,
    ];

    /// Wire index (0..7).
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`TetrominoType::index`].
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Board color written when this piece locks (1..=3).
    pub fn color(self) -> u8 {
        match self {
            TetrominoType::T | TetrominoType::O | TetrominoType::I => 1,
            TetrominoType::J | TetrominoType::S => 2,
            TetrominoType::Z | TetrominoType::L => 3,
        }
    }

    /// Number of distinct rotation states.
    pub fn num_rotations(self) -> u8 {
        match self {
            TetrominoType::T | TetrominoType::J | TetrominoType::L => 4,
            TetrominoType::S | TetrominoType::Z | TetrominoType::I => 2,
            TetrominoType::O => 1,
        }
    }

    /// Block offsets from the pivot for a rotation state (x right, y down).
    pub fn offsets(self, rotation: u8) -> [(i8, i8); 4] {
        let rotation = rotation % self.num_rotations();
        match self {
            TetrominoType::O => [(-1, 0), (0, 0), (-1, 1), (0, 1)],
            TetrominoType::I => match rotation {
                0 => [(-2, 0), (-1, 0), (0, 0), (1, 0)],
                _ => [(0, -2), (0, -1), (0, 0), (0, 1)],
            },
            TetrominoType::S => match rotation {
                0 => [(0, 0), (1, 0), (-1, 1), (0, 1)],
                _ => [(0, -1), (0, 0), (1, 0), (1, 1)],
            },
            TetrominoType::Z => match rotation {
                0 => [(-1, 0), (0, 0), (0, 1), (1, 1)],
                _ => [(1, -1), (1, 0), (0, 0), (0, 1)],
            },
            TetrominoType::T | TetrominoType::J | TetrominoType::L => {
                let mut blocks = match self {
                    TetrominoType::T => [(-1, 0), (0, 0), (1, 0), (0, 1)],
                    TetrominoType::J => [(-1, 0), (0, 0), (1, 0), (1, 1)],
                    _ => [(-1, 0), (0, 0), (1, 0), (-1, 1)],
                };
                // Clockwise in screen coordinates: (x, y) -> (-y, x)
                for _ in 0..rotation {
                    for block in blocks.iter_mut() {
                        *block = (-block.1, block.0);
                    }
                }
                blocks
            }
        }
    }
}

impl std::fmt::Display for TetrominoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TetrominoType::T => "T",
            TetrominoType::J => "J",
            TetrominoType::Z => "Z",
            TetrominoType::O => "O",
            TetrominoType::S => "S",
            TetrominoType::L => "L",
            TetrominoType::I => "I",
        };
        f.write_str(name)
    }
}

/// Rotation state plus pivot position of a piece on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MtPose {
    /// Rotation state, normalized by the piece's rotation count.
    pub rotation: u8,
    /// Pivot column.
    pub x: i8,
    /// Pivot row (0 is the top visible row).
    pub y: i8,
}

/// Pivot pose of every freshly spawned piece.
pub const SPAWN_POSE: MtPose = MtPose { rotation: 0, x: 5, y: 0 };

/// Rotation direction for player input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    /// Counter-clockwise.
    Left,
    /// Clockwise.
    Right,
}

/// A piece type at a concrete pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveableTetromino {
    /// Piece type.
    pub kind: TetrominoType,
    /// Current pose.
    pub pose: MtPose,
}

impl MoveableTetromino {
    /// Build from a type and pose, normalizing the rotation.
    pub fn new(kind: TetrominoType, pose: MtPose) -> Self {
        let rotation = pose.rotation % kind.num_rotations();
        Self {
            kind,
            pose: MtPose { rotation, ..pose },
        }
    }

    /// Piece at the spawn pose.
    pub fn spawn(kind: TetrominoType) -> Self {
        Self::new(kind, SPAWN_POSE)
    }

    /// Absolute (x, y) cells covered by the piece.
    pub fn blocks(&self) -> [(i32, i32); 4] {
        let offsets = self.kind.offsets(self.pose.rotation);
        let mut out = [(0, 0); 4];
        for (slot, (dx, dy)) in out.iter_mut().zip(offsets) {
            *slot = (self.pose.x as i32 + dx as i32, self.pose.y as i32 + dy as i32);
        }
        out
    }

    /// Copy translated by (dx, dy).
    pub fn translated(&self, dx: i8, dy: i8) -> Self {
        Self {
            kind: self.kind,
            pose: MtPose {
                rotation: self.pose.rotation,
                x: self.pose.x.saturating_add(dx),
                y: self.pose.y.saturating_add(dy),
            },
        }
    }

    /// Copy rotated one step in the given direction.
    pub fn rotated(&self, direction: RotationDirection) -> Self {
        let n = self.kind.num_rotations();
        let rotation = match direction {
            RotationDirection::Right => (self.pose.rotation + 1) % n,
            RotationDirection::Left => (self.pose.rotation + n - 1) % n,
        };
        Self {
            kind: self.kind,
            pose: MtPose { rotation, ..self.pose },
        }
    }

    /// True if every block is inside the board walls and on empty cells.
    ///
    /// Cells above the top row are allowed.
    pub fn is_valid_on(&self, board: &TetrisBoard) -> bool {
        self.blocks().iter().all(|&(x, y)| board.is_free(x, y))
    }

    /// Drop straight down until the next row would collide.
    pub fn hard_dropped(&self, board: &TetrisBoard) -> Self {
        let mut piece = *self;
        loop {
            let next = piece.translated(0, 1);
            if !next.is_valid_on(board) {
                return piece;
            }
            piece = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip() {
        for kind in TetrominoType::ALL {
            assert_eq!(TetrominoType::from_index(kind.index()), Some(kind));
        }
        assert_eq!(TetrominoType::from_index(7), None);
    }

    #[test]
    fn test_four_rotations_return_to_spawn() {
        for kind in TetrominoType::ALL {
            let spawn = MoveableTetromino::spawn(kind);
            let mut piece = spawn;
            for _ in 0..4 {
                piece = piece.rotated(RotationDirection::Right);
            }
            assert_eq!(piece.blocks(), spawn.blocks(), "{kind}");
        }
    }

    #[test]
    fn test_left_undoes_right() {
        let piece = MoveableTetromino::spawn(TetrominoType::J);
        let back = piece
            .rotated(RotationDirection::Right)
            .rotated(RotationDirection::Left);
        assert_eq!(back, piece);
    }

    #[test]
    fn test_t_spawns_pointing_down() {
        let t = MoveableTetromino::spawn(TetrominoType::T);
        let blocks = t.blocks();
        assert!(blocks.contains(&(4, 0)));
        assert!(blocks.contains(&(6, 0)));
        assert!(blocks.contains(&(5, 1)));
    }

    #[test]
    fn test_hard_drop_lands_on_floor() {
        let board = TetrisBoard::new();
        let dropped = MoveableTetromino::spawn(TetrominoType::O).hard_dropped(&board);
        let max_y = dropped.blocks().iter().map(|b| b.1).max();
        assert_eq!(max_y, Some(19));
    }

    #[test]
    fn test_walls_collide() {
        let board = TetrisBoard::new();
        let i = MoveableTetromino::new(TetrominoType::I, MtPose { rotation: 0, x: 1, y: 5 });
        assert!(!i.is_valid_on(&board));
        let i = MoveableTetromino::new(TetrominoType::I, MtPose { rotation: 0, x: 2, y: 5 });
        assert!(i.is_valid_on(&board));
    }

    #[test]
    fn test_rotation_normalized() {
        let s = MoveableTetromino::new(TetrominoType::S, MtPose { rotation: 3, x: 5, y: 5 });
        assert_eq!(s.pose.rotation, 1);
    }
}
