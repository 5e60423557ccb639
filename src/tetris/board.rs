//! 20x10 playfield.

use serde::{Deserialize, Serialize};

use super::tetromino::MoveableTetromino;

/// Visible rows.
pub const BOARD_ROWS: usize = 20;
/// Columns.
pub const BOARD_COLS: usize = 10;

/// Board cells: 0 is empty, 1..=3 are the three piece colors.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct TetrisBoard {
    cells: [[u8; BOARD_COLS]; BOARD_ROWS],
}

/// Two bits per cell, one u32 per row. Used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackedBoard(pub [u32; BOARD_ROWS]);

impl TetrisBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell color at (x, y), or 0 when out of range.
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.cells
            .get(y)
            .and_then(|row| row.get(x))
            .copied()
            .unwrap_or(0)
    }

    /// Set a cell. Out-of-range writes are ignored.
    pub fn set(&mut self, x: usize, y: usize, color: u8) {
        if let Some(cell) = self.cells.get_mut(y).and_then(|row| row.get_mut(x)) {
            *cell = color & 0b11;
        }
    }

    /// Whether a piece block may occupy (x, y).
    ///
    /// Columns outside the walls and rows below the floor collide; rows above
    /// the top are open.
    pub fn is_free(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= BOARD_COLS as i32 || y >= BOARD_ROWS as i32 {
            return false;
        }
        if y < 0 {
            return true;
        }
        self.cells[y as usize][x as usize] == 0
    }

    /// Write the piece's visible blocks onto the board.
    pub fn place(&mut self, piece: &MoveableTetromino) {
        let color = piece.kind.color();
        for (x, y) in piece.blocks() {
            if x >= 0 && y >= 0 {
                self.set(x as usize, y as usize, color);
            }
        }
    }

    /// Copy of the board with the piece drawn on top.
    pub fn with_piece(&self, piece: &MoveableTetromino) -> Self {
        let mut board = self.clone();
        board.place(piece);
        board
    }

    /// Indices of completely filled rows, top to bottom.
    pub fn full_rows(&self) -> Vec<usize> {
        (0..BOARD_ROWS)
            .filter(|&y| self.cells[y].iter().all(|&c| c != 0))
            .collect()
    }

    /// Remove filled rows, shifting everything above down. Returns rows cleared.
    pub fn clear_lines(&mut self) -> u8 {
        let kept: Vec<[u8; BOARD_COLS]> = self
            .cells
            .iter()
            .filter(|row| row.iter().any(|&c| c == 0))
            .copied()
            .collect();
        let cleared = BOARD_ROWS - kept.len();
        let mut cells = [[0u8; BOARD_COLS]; BOARD_ROWS];
        for (dst, src) in cells.iter_mut().skip(cleared).zip(kept) {
            *dst = src;
        }
        self.cells = cells;
        cleared as u8
    }

    /// Height of each column (0 for empty).
    pub fn column_heights(&self) -> [u8; BOARD_COLS] {
        let mut heights = [0u8; BOARD_COLS];
        for (x, height) in heights.iter_mut().enumerate() {
            if let Some(top) = (0..BOARD_ROWS).find(|&y| self.cells[y][x] != 0) {
                *height = (BOARD_ROWS - top) as u8;
            }
        }
        heights
    }

    /// Empty cells with a filled cell somewhere above them.
    pub fn count_holes(&self) -> u32 {
        let mut holes = 0;
        for x in 0..BOARD_COLS {
            let mut covered = false;
            for y in 0..BOARD_ROWS {
                if self.cells[y][x] != 0 {
                    covered = true;
                } else if covered {
                    holes += 1;
                }
            }
        }
        holes
    }

    /// Number of filled cells.
    pub fn filled_count(&self) -> u32 {
        self.cells
            .iter()
            .flat_map(|row| row.iter())
            .filter(|&&c| c != 0)
            .count() as u32
    }

    /// Pack into the wire representation.
    pub fn to_packed(&self) -> PackedBoard {
        let mut rows = [0u32; BOARD_ROWS];
        for (packed, row) in rows.iter_mut().zip(self.cells.iter()) {
            for (x, &cell) in row.iter().enumerate() {
                *packed |= ((cell & 0b11) as u32) << (x * 2);
            }
        }
        PackedBoard(rows)
    }

    /// Unpack from the wire representation. Bits above column 10 are ignored.
    pub fn from_packed(packed: &PackedBoard) -> Self {
        let mut board = Self::new();
        for (y, &bits) in packed.0.iter().enumerate() {
            for x in 0..BOARD_COLS {
                board.cells[y][x] = ((bits >> (x * 2)) & 0b11) as u8;
            }
        }
        board
    }

    /// Parse from 200 characters of '0'..'3', row-major (puzzle fixtures).
    pub fn from_digits(digits: &str) -> Option<Self> {
        let mut board = Self::new();
        let mut count = 0;
        for (i, ch) in digits.chars().filter(|c| !c.is_whitespace()).enumerate() {
            let color = ch.to_digit(4)? as u8;
            if i >= BOARD_ROWS * BOARD_COLS {
                return None;
            }
            board.cells[i / BOARD_COLS][i % BOARD_COLS] = color;
            count += 1;
        }
        (count == BOARD_ROWS * BOARD_COLS).then_some(board)
    }

    /// Inverse of [`TetrisBoard::from_digits`].
    pub fn to_digits(&self) -> String {
        self.cells
            .iter()
            .flat_map(|row| row.iter())
            .map(|&c| char::from(b'0' + c))
            .collect()
    }
}

impl std::fmt::Debug for TetrisBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        for row in &self.cells {
            let line: String = row
                .iter()
                .map(|&c| if c == 0 { '.' } else { char::from(b'0' + c) })
                .collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
