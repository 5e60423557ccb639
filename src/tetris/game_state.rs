//! Game state rebuilt purely from the packet stream.
//!
//! Nothing here simulates gravity or input. Each method corresponds to one
//! packet kind and applies exactly what that packet reports, so two observers
//! fed the same packets always agree.

use super::board::TetrisBoard;
use super::rules::{level_for_lines, line_clear_score};
use super::tetromino::{MoveableTetromino, MtPose, TetrominoType};

/// Countdown value meaning "no countdown running".
pub const COUNTDOWN_NONE: u8 = 0;
/// Countdown value sent once the level cap stops the game.
pub const COUNTDOWN_LINECAP_REACHED: u8 = 254;
/// Countdown value of a recovery describing a player between games.
pub const COUNTDOWN_NOT_IN_GAME: u8 = 255;

/// Full snapshot carried by a RECOVERY packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecovery {
    /// Level the game started on.
    pub start_level: u8,
    /// Current level.
    pub level: u8,
    /// Lines cleared.
    pub lines: u16,
    /// Score.
    pub score: u32,
    /// Countdown value (see the `COUNTDOWN_*` constants).
    pub countdown: u8,
    /// Active piece type.
    pub current: TetrominoType,
    /// Preview piece type.
    pub next: TetrominoType,
    /// Four-line clears so far.
    pub tetris_count: u16,
    /// Pieces locked so far.
    pub num_placements: u16,
    /// Locked cells only.
    pub isolated_board: TetrisBoard,
    /// What the player currently sees.
    pub display_board: TetrisBoard,
    /// Active piece pose, if one is falling.
    pub active: Option<MtPose>,
}

impl GameRecovery {
    /// Recovery describing a player who is not in a game.
    pub fn not_in_game(snapshot: Option<&GameSnapshot>) -> Self {
        let mut recovery = match snapshot {
            Some(s) => s.to_recovery(),
            None => GameState::new(0, TetrominoType::T, TetrominoType::T).to_recovery(),
        };
        recovery.countdown = COUNTDOWN_NOT_IN_GAME;
        recovery.active = None;
        recovery
    }

    /// True if this recovery only carries a between-games snapshot.
    pub fn is_not_in_game(&self) -> bool {
        self.countdown == COUNTDOWN_NOT_IN_GAME
    }
}

/// Wholesale replacement of board and counters, without placement history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFullState {
    /// Board as seen by the player.
    pub board: TetrisBoard,
    /// Active piece type.
    pub current: TetrominoType,
    /// Preview piece type.
    pub next: TetrominoType,
    /// Current level.
    pub level: u8,
    /// Lines cleared.
    pub lines: u16,
    /// Score.
    pub score: u32,
}

/// Immutable view of a game, kept after the game ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    /// Level the game started on.
    pub start_level: u8,
    /// Level.
    pub level: u8,
    /// Lines.
    pub lines: u16,
    /// Score.
    pub score: u32,
    /// Four-line clears.
    pub tetris_count: u16,
    /// Pieces locked.
    pub num_placements: u16,
    /// Active piece type.
    pub current: TetrominoType,
    /// Preview piece type.
    pub next: TetrominoType,
    /// Countdown value.
    pub countdown: u8,
    /// Locked cells only.
    pub isolated_board: TetrisBoard,
    /// What the player sees.
    pub display_board: TetrisBoard,
    /// Active piece pose.
    pub active: Option<MtPose>,
}

impl GameSnapshot {
    /// Recovery packet content for this snapshot.
    pub fn to_recovery(&self) -> GameRecovery {
        GameRecovery {
            start_level: self.start_level,
            level: self.level,
            lines: self.lines,
            score: self.score,
            countdown: self.countdown,
            current: self.current,
            next: self.next,
            tetris_count: self.tetris_count,
            num_placements: self.num_placements,
            isolated_board: self.isolated_board.clone(),
            display_board: self.display_board.clone(),
            active: self.active,
        }
    }
}

/// Live state of one player's game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    start_level: u8,
    level: u8,
    lines: u16,
    score: u32,
    tetris_count: u16,
    num_placements: u16,
    countdown: u8,
    current: TetrominoType,
    next: TetrominoType,
    isolated: TetrisBoard,
    display: TetrisBoard,
    active: Option<MtPose>,
}

impl GameState {
    /// State after a START packet.
    pub fn new(start_level: u8, current: TetrominoType, next: TetrominoType) -> Self {
        Self {
            start_level,
            level: start_level,
            lines: 0,
            score: 0,
            tetris_count: 0,
            num_placements: 0,
            countdown: COUNTDOWN_NONE,
            current,
            next,
            isolated: TetrisBoard::new(),
            display: TetrisBoard::new(),
            active: None,
        }
    }

    /// State rebuilt from a RECOVERY packet.
    pub fn from_recovery(recovery: &GameRecovery) -> Self {
        Self {
            start_level: recovery.start_level,
            level: recovery.level,
            lines: recovery.lines,
            score: recovery.score,
            tetris_count: recovery.tetris_count,
            num_placements: recovery.num_placements,
            countdown: recovery.countdown,
            current: recovery.current,
            next: recovery.next,
            isolated: recovery.isolated_board.clone(),
            display: recovery.display_board.clone(),
            active: recovery.active,
        }
    }

    /// RECOVERY content describing this state exactly.
    pub fn to_recovery(&self) -> GameRecovery {
        self.snapshot().to_recovery()
    }

    /// A piece locked at `pose`. Returns the number of lines cleared.
    pub fn on_placement(&mut self, next_next: TetrominoType, pose: MtPose, pushdown: u8) -> u8 {
        let piece = MoveableTetromino::new(self.current, pose);
        self.isolated.place(&piece);
        let cleared = self.isolated.clear_lines();

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

        self.current = self.next;
        self.next = next_next;
        self.active = None;
        self.display = self.isolated.clone();
        cleared
    }

    /// Only the active piece moved.
    pub fn on_abbr_board(&mut self, pose: MtPose) {
        let piece = MoveableTetromino::new(self.current, pose);
        self.active = Some(piece.pose);
        self.display = self.isolated.with_piece(&piece);
    }

    /// The visible board changed in a way a pose cannot express.
    pub fn on_full_board(&mut self, board: TetrisBoard) {
        self.active = None;
        self.display = board;
    }

    /// Countdown changed.
    pub fn on_countdown(&mut self, countdown: u8) {
        self.countdown = countdown;
    }

    /// Replace board and counters wholesale.
    pub fn on_full_state(&mut self, full: &GameFullState) {
        self.isolated = full.board.clone();
        self.display = full.board.clone();
        self.current = full.current;
        self.next = full.next;
        self.lines = full.lines;
        self.score = full.score;
        self.level = full.level;
        self.active = None;
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            start_level: self.start_level,
            level: self.level,
            lines: self.lines,
            score: self.score,
            tetris_count: self.tetris_count,
            num_placements: self.num_placements,
            current: self.current,
            next: self.next,
            countdown: self.countdown,
            isolated_board: self.isolated.clone(),
            display_board: self.display.clone(),
            active: self.active,
        }
    }

    /// Score.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Lines.
    pub fn lines(&self) -> u16 {
        self.lines
    }

    /// Start level.
    pub fn start_level(&self) -> u8 {
        self.start_level
    }

    /// Countdown value.
    pub fn countdown(&self) -> u8 {
        self.countdown
    }

    /// Pieces locked.
    pub fn num_placements(&self) -> u16 {
        self.num_placements
    }

    /// Four-line clears.
    pub fn tetris_count(&self) -> u16 {
        self.tetris_count
    }

    /// Active piece type.
    pub fn current(&self) -> TetrominoType {
        self.current
    }

    /// Preview piece type.
    pub fn next(&self) -> TetrominoType {
        self.next
    }

    /// Locked cells only.
    pub fn isolated_board(&self) -> &TetrisBoard {
        &self.isolated
    }

    /// Board as displayed.
    pub fn display_board(&self) -> &TetrisBoard {
        &self.display
    }
}
