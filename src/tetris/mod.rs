//! Classic block-stacking game model.
//!
//! Two views of a game live here. [`GameState`] is rebuilt passively from
//! packets and is what the server trusts for scoring. [`Emulator`] runs the
//! rules frame by frame and is what bots play on.

pub mod analysis;
pub mod board;
pub mod emulator;
pub mod game_state;
pub mod piece_sequence;
pub mod rules;
pub mod tetromino;

pub use board::{PackedBoard, TetrisBoard, BOARD_COLS, BOARD_ROWS};
pub use emulator::{Emulator, GameOverReason, InputKey, KeyState};
pub use game_state::{
    GameFullState, GameRecovery, GameSnapshot, GameState, COUNTDOWN_LINECAP_REACHED,
    COUNTDOWN_NONE, COUNTDOWN_NOT_IN_GAME,
};
pub use piece_sequence::{PieceSequence, SeedError};
pub use tetromino::{MoveableTetromino, MtPose, RotationDirection, TetrominoType, SPAWN_POSE};
