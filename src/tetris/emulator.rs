//! Frame-by-frame emulation of a classic game.
//!
//! Bots play through this so the packets they emit are produced by the same
//! frame transitions a real client goes through: countdown, gravity,
//! pushdown, lock, line-clear delay, entry delay and topout.

use super::board::TetrisBoard;
use super::piece_sequence::{PieceSequence, SeedError};
use super::rules::{gravity_frames, level_for_lines, line_clear_score};
use super::tetromino::{MoveableTetromino, RotationDirection, TetrominoType};

/// Frames per countdown step.
pub const COUNTDOWN_STEP_FRAMES: u32 = 60;
/// Frames the line-clear animation lasts.
pub const LINE_CLEAR_FRAMES: u32 = 17;
/// Frames between a lock (or finished clear) and the next spawn.
pub const ENTRY_DELAY_FRAMES: u32 = 10;
/// Frames per row while pushdown is held.
pub const PUSHDOWN_FRAMES: u8 = 2;

/// Controller buttons used by the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKey {
    /// Move left.
    ShiftLeft,
    /// Move right.
    ShiftRight,
    /// Rotate counter-clockwise.
    RotateLeft,
    /// Rotate clockwise.
    RotateRight,
    /// Soft drop.
    Pushdown,
}

impl InputKey {
    fn bit(self) -> u8 {
        match self {
            InputKey::ShiftLeft => 1,
            InputKey::ShiftRight => 1 << 1,
            InputKey::RotateLeft => 1 << 2,
            InputKey::RotateRight => 1 << 3,
            InputKey::Pushdown => 1 << 4,
        }
    }
}

/// Set of keys held during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeyState(u8);

impl KeyState {
    /// No keys held.
    pub const NONE: KeyState = KeyState(0);

    /// Copy with `key` held.
    pub fn with(self, key: InputKey) -> Self {
        KeyState(self.0 | key.bit())
    }

    /// Whether `key` is held.
    pub fn contains(self, key: InputKey) -> bool {
        self.0 & key.bit() != 0
    }

    /// True when nothing is held.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn newly_pressed(self, previous: KeyState) -> KeyState {
        KeyState(self.0 & !previous.0)
    }
}

impl From<InputKey> for KeyState {
    fn from(key: InputKey) -> Self {
        KeyState::NONE.with(key)
    }
}

/// Why a game stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOverReason {
    /// The next piece could not spawn.
    Topout,
    /// The level cap was reached.
    LevelCap,
}

/// The most recent lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedPiece {
    /// Piece at its final pose.
    pub piece: MoveableTetromino,
    /// Pushdown points earned by this piece.
    pub pushdown: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Countdown { frames_left: u32 },
    Falling,
    LineClear { frames_left: u32 },
    Entry { frames_left: u32 },
    Over,
}

/// Emulated game.
#[derive(Debug, Clone)]
pub struct Emulator {
    start_level: u8,
    level: u8,
    lines: u16,
    score: u32,
    tetris_count: u16,
    num_placements: u16,
    board: TetrisBoard,
    piece: MoveableTetromino,
    next: TetrominoType,
    next_next: TetrominoType,
    sequence: PieceSequence,
    phase: Phase,
    gravity_counter: u8,
    pushdown_counter: u8,
    pushdown_rows: u8,
    previous_keys: KeyState,
    placement_frames: u32,
    level_cap: Option<u8>,
    end: Option<GameOverReason>,
    last_lock: Option<LockedPiece>,
}

impl Emulator {
    /// New game from a piece-sequence seed.
    pub fn new(
        start_level: u8,
        seed: &str,
        countdown_steps: u8,
        level_cap: Option<u8>,
    ) -> Result<Self, SeedError> {
        let mut sequence = PieceSequence::from_seed(seed)?;
        let current = sequence.next_piece();
        let next = sequence.next_piece();
        let next_next = sequence.next_piece();

        let phase = if countdown_steps == 0 {
            Phase::Falling
        } else {
            Phase::Countdown {
                frames_left: countdown_steps as u32 * COUNTDOWN_STEP_FRAMES,
            }
        };

        Ok(Self {
            start_level,
            level: start_level,
            lines: 0,
            score: 0,
            tetris_count: 0,
            num_placements: 0,
            board: TetrisBoard::new(),
            piece: MoveableTetromino::spawn(current),
            next,
            next_next,
            sequence,
            phase,
            gravity_counter: 0,
            pushdown_counter: 0,
            pushdown_rows: 0,
            previous_keys: KeyState::NONE,
            placement_frames: 0,
            level_cap,
            end: None,
            last_lock: None,
        })
    }

    /// Advance one frame with the given keys held.
    pub fn execute_frame(&mut self, keys: KeyState) {
        let pressed = keys.newly_pressed(self.previous_keys);
        self.previous_keys = keys;

        match self.phase {
            Phase::Over => {}
            Phase::Countdown { frames_left } => {
                self.phase = if frames_left <= 1 {
                    Phase::Falling
                } else {
                    Phase::Countdown {
                        frames_left: frames_left - 1,
                    }
                };
            }
            Phase::LineClear { frames_left } => {
                if frames_left <= 1 {
                    self.board.clear_lines();
                    self.phase = Phase::Entry {
                        frames_left: ENTRY_DELAY_FRAMES,
                    };
                } else {
                    self.phase = Phase::LineClear {
                        frames_left: frames_left - 1,
                    };
                }
            }
            Phase::Entry { frames_left } => {
                if frames_left <= 1 {
                    self.spawn_next();
                } else {
                    self.phase = Phase::Entry {
                        frames_left: frames_left - 1,
                    };
                }
            }
            Phase::Falling => self.falling_frame(keys, pressed),
        }
    }

    fn falling_frame(&mut self, keys: KeyState, pressed: KeyState) {
        self.placement_frames += 1;

        if pressed.contains(InputKey::ShiftLeft) {
            self.try_move(self.piece.translated(-1, 0));
        }
        if pressed.contains(InputKey::ShiftRight) {
            self.try_move(self.piece.translated(1, 0));
        }
        if pressed.contains(InputKey::RotateLeft) {
            self.try_move(self.piece.rotated(RotationDirection::Left));
        }
        if pressed.contains(InputKey::RotateRight) {
            self.try_move(self.piece.rotated(RotationDirection::Right));
        }

        let mut drop = false;
        let mut pushed = false;
        if keys.contains(InputKey::Pushdown) {
            self.pushdown_counter += 1;
            if self.pushdown_counter >= PUSHDOWN_FRAMES {
                self.pushdown_counter = 0;
                drop = true;
                pushed = true;
            }
        } else {
            self.pushdown_counter = 0;
            self.pushdown_rows = 0;
        }

        self.gravity_counter += 1;
        if self.gravity_counter >= gravity_frames(self.level) {
            drop = true;
        }

        if drop {
            self.gravity_counter = 0;
            let lowered = self.piece.translated(0, 1);
            if lowered.is_valid_on(&self.board) {
                self.piece = lowered;
                if pushed {
                    self.pushdown_rows = self.pushdown_rows.saturating_add(1);
                }
            } else {
                self.lock();
            }
        }
    }

    fn try_move(&mut self, candidate: MoveableTetromino) {
        if candidate.is_valid_on(&self.board) {
            self.piece = candidate;
        }
    }

    fn lock(&mut self) {
        self.board.place(&self.piece);
        let pushdown = self.pushdown_rows;
        self.last_lock = Some(LockedPiece {
            piece: self.piece,
            pushdown,
        });

        let cleared = self.board.full_rows().len() as u8;
        self.score = self
            .score
            .saturating_add(line_clear_score(cleared, self.level))
            .saturating_add(pushdown as u32);
        self.lines = self.lines.saturating_add(cleared as u16);
        self.level = self.level.max(level_for_lines(self.start_level, self.lines as u32));
        if cleared == 4 {
            self.tetris_count += 1;
        }
        self.num_placements = self.num_placements.saturating_add(1);

        self.pushdown_rows = 0;
        self.pushdown_counter = 0;
        self.gravity_counter = 0;

        if self.level_cap.map(|cap| self.level >= cap).unwrap_or(false) {
            self.board.clear_lines();
            self.end = Some(GameOverReason::LevelCap);
            self.phase = Phase::Over;
        } else if cleared > 0 {
            self.phase = Phase::LineClear {
                frames_left: LINE_CLEAR_FRAMES,
            };
        } else {
            self.phase = Phase::Entry {
                frames_left: ENTRY_DELAY_FRAMES,
            };
        }
    }

    fn spawn_next(&mut self) {
        let current = self.next;
        self.next = self.next_next;
        self.next_next = self.sequence.next_piece();
        self.piece = MoveableTetromino::spawn(current);
        self.placement_frames = 0;
        self.gravity_counter = 0;

        if self.piece.is_valid_on(&self.board) {
            self.phase = Phase::Falling;
        } else {
            self.end = Some(GameOverReason::Topout);
            self.phase = Phase::Over;
        }
    }

    /// Countdown step still showing (0 when none).
    pub fn countdown(&self) -> u8 {
        match self.phase {
            Phase::Countdown { frames_left } => {
                frames_left.div_ceil(COUNTDOWN_STEP_FRAMES).min(u8::MAX as u32) as u8
            }
            _ => 0,
        }
    }

    /// The falling piece, if any.
    pub fn active_piece(&self) -> Option<MoveableTetromino> {
        match self.phase {
            Phase::Countdown { .. } | Phase::Falling => Some(self.piece),
            _ => None,
        }
    }

    /// True between a lock and the next spawn (and after the game ends).
    pub fn is_piece_locked(&self) -> bool {
        !matches!(self.phase, Phase::Countdown { .. } | Phase::Falling)
    }

    /// Board as displayed: locked cells plus the active piece.
    pub fn display_board(&self) -> TetrisBoard {
        match self.active_piece() {
            Some(piece) => self.board.with_piece(&piece),
            None => self.board.clone(),
        }
    }

    /// Locked cells. During the clear animation this still holds the full rows.
    pub fn board(&self) -> &TetrisBoard {
        &self.board
    }

    /// Frames the current piece has been under player control.
    pub fn placement_frame_count(&self) -> u32 {
        self.placement_frames
    }

    /// True once the game has stopped.
    pub fn is_over(&self) -> bool {
        self.phase == Phase::Over
    }

    /// Why the game stopped.
    pub fn end_reason(&self) -> Option<GameOverReason> {
        self.end
    }

    /// True once the level cap stopped the game.
    pub fn reached_level_cap(&self) -> bool {
        self.end == Some(GameOverReason::LevelCap)
    }

    /// Most recent lock.
    pub fn last_lock(&self) -> Option<LockedPiece> {
        self.last_lock
    }

    /// Type of the falling (or next to spawn) piece.
    pub fn current(&self) -> TetrominoType {
        self.piece.kind
    }

    /// Preview piece.
    pub fn next(&self) -> TetrominoType {
        self.next
    }

    /// Piece after the preview.
    pub fn next_next(&self) -> TetrominoType {
        self.next_next
    }

    /// Start level.
    pub fn start_level(&self) -> u8 {
        self.start_level
    }

    /// Level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Lines.
    pub fn lines(&self) -> u16 {
        self.lines
    }

    /// Score.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Pieces locked.
    pub fn num_placements(&self) -> u16 {
        self.num_placements
    }

    /// Four-line clears.
    pub fn tetris_count(&self) -> u16 {
        self.tetris_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_emulator(level: u8) -> Emulator {
        Emulator::new(level, "5a3c01", 0, None).unwrap()
    }

    #[test]
    fn test_countdown_freezes_piece() {
        let mut emu = Emulator::new(18, "5a3c01", 3, None).unwrap();
        assert_eq!(emu.countdown(), 3);
        let start = emu.active_piece();
        for _ in 0..(COUNTDOWN_STEP_FRAMES * 3 - 1) {
            emu.execute_frame(InputKey::Pushdown.into());
        }
        assert_eq!(emu.countdown(), 1);
        assert_eq!(emu.active_piece(), start);
        emu.execute_frame(KeyState::NONE);
        assert_eq!(emu.countdown(), 0);
        assert_eq!(emu.placement_frame_count(), 0);
    }

    #[test]
    fn test_taps_shift_once_per_press() {
        let mut emu = create_test_emulator(0);
        let x0 = emu.active_piece().unwrap().pose.x;
        emu.execute_frame(InputKey::ShiftRight.into());
        emu.execute_frame(InputKey::ShiftRight.into());
        assert_eq!(emu.active_piece().unwrap().pose.x, x0 + 1);
        emu.execute_frame(KeyState::NONE);
        emu.execute_frame(InputKey::ShiftRight.into());
        assert_eq!(emu.active_piece().unwrap().pose.x, x0 + 2);
    }

    #[test]
    fn test_piece_locks_and_spawns() {
        let mut emu = create_test_emulator(29);
        let first = emu.current();
        let second = emu.next();
        let mut frames = 0;
        while !emu.is_piece_locked() {
            emu.execute_frame(KeyState::NONE);
            frames += 1;
            assert!(frames < 100);
        }
        assert_eq!(emu.num_placements(), 1);
        assert_eq!(emu.last_lock().unwrap().piece.kind, first);

        for _ in 0..ENTRY_DELAY_FRAMES {
            emu.execute_frame(KeyState::NONE);
        }
        assert!(!emu.is_piece_locked());
        assert_eq!(emu.current(), second);
    }

    #[test]
    fn test_pushdown_scores_rows() {
        let mut emu = create_test_emulator(0);
        while !emu.is_piece_locked() {
            emu.execute_frame(InputKey::Pushdown.into());
        }
        let lock = emu.last_lock().unwrap();
        assert!(lock.pushdown >= 15);
        assert_eq!(emu.score(), lock.pushdown as u32);
    }

    #[test]
    fn test_drops_without_input_top_out() {
        let mut emu = create_test_emulator(29);
        let mut frames = 0;
        while !emu.is_over() {
            emu.execute_frame(KeyState::NONE);
            frames += 1;
            assert!(frames < 20_000);
        }
        assert_eq!(emu.end_reason(), Some(GameOverReason::Topout));
        assert!(emu.active_piece().is_none());
    }

    #[test]
    fn test_level_cap_ends_game() {
        let mut emu = Emulator::new(0, "5a3c01", 0, Some(0)).unwrap();
        while !emu.is_over() {
            emu.execute_frame(KeyState::NONE);
        }
        assert!(emu.reached_level_cap());
        assert_eq!(emu.num_placements(), 1);
    }
}
