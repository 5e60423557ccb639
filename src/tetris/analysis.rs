//! Placement enumeration and static board scoring.
//!
//! Used by the built-in evaluator and to solve generated puzzles. Only
//! straight hard drops from above the stack are considered; tucks and spins
//! are not.

use std::collections::HashSet;

use super::{MoveableTetromino, MtPose, TetrisBoard, TetrominoType, BOARD_COLS};

const HEIGHT_WEIGHT: f64 = -0.51;
const LINES_WEIGHT: f64 = 0.76;
const HOLES_WEIGHT: f64 = -0.36;
const BUMPINESS_WEIGHT: f64 = -0.18;

/// A locked piece and the board it leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drop {
    /// Final piece.
    pub piece: MoveableTetromino,
    /// Board after the lock and any clears.
    pub board: TetrisBoard,
    /// Lines cleared.
    pub lines: u8,
}

/// Best line found for a piece pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPlacement {
    /// First piece's final pose.
    pub first: MtPose,
    /// Second piece's final pose, when a next piece was given.
    pub second: Option<MtPose>,
    /// Static score, higher is better.
    pub score: f64,
}

/// Every distinct hard-drop resting position of `kind`.
pub fn enumerate_drops(board: &TetrisBoard, kind: TetrominoType) -> Vec<Drop> {
    let mut seen = HashSet::new();
    let mut drops = Vec::new();
    for rotation in 0..kind.num_rotations() {
        for x in -2..(BOARD_COLS as i8 + 2) {
            let piece = MoveableTetromino::new(kind, MtPose { rotation, x, y: 0 });
            if !piece.is_valid_on(board) {
                continue;
            }
            let landed = piece.hard_dropped(board);
            let mut cells = landed.blocks();
            cells.sort_unstable();
            if !seen.insert(cells) {
                continue;
            }
            let mut after = board.with_piece(&landed);
            let lines = after.clear_lines();
            drops.push(Drop {
                piece: landed,
                board: after,
                lines,
            });
        }
    }
    drops
}

/// Static score of a board after clearing `lines`.
pub fn score_board(board: &TetrisBoard, lines: u8) -> f64 {
    let heights = board.column_heights();
    let aggregate: u32 = heights.iter().map(|&h| u32::from(h)).sum();
    let bumpiness: u32 = heights
        .windows(2)
        .map(|w| (i32::from(w[0]) - i32::from(w[1])).unsigned_abs())
        .sum();
    HEIGHT_WEIGHT * f64::from(aggregate)
        + LINES_WEIGHT * f64::from(lines)
        + HOLES_WEIGHT * f64::from(board.count_holes())
        + BUMPINESS_WEIGHT * f64::from(bumpiness)
}

/// Candidate placements for `current` ranked best first.
///
/// With a `next` piece every first placement is scored by its best
/// follow-up.
pub fn ranked_placements(
    board: &TetrisBoard,
    current: TetrominoType,
    next: Option<TetrominoType>,
) -> Vec<ScoredPlacement> {
    let mut ranked: Vec<ScoredPlacement> = enumerate_drops(board, current)
        .into_iter()
        .map(|first| match next {
            None => ScoredPlacement {
                first: first.piece.pose,
                second: None,
                score: score_board(&first.board, first.lines),
            },
            Some(next) => {
                let best = enumerate_drops(&first.board, next)
                    .into_iter()
                    .map(|second| {
                        let score =
                            score_board(&second.board, first.lines + second.lines);
                        (second.piece.pose, score)
                    })
                    .max_by(|a, b| a.1.total_cmp(&b.1));
                match best {
                    Some((pose, score)) => ScoredPlacement {
                        first: first.piece.pose,
                        second: Some(pose),
                        score,
                    },
                    // Next piece has nowhere to go
                    None => ScoredPlacement {
                        first: first.piece.pose,
                        second: None,
                        score: f64::NEG_INFINITY,
                    },
                }
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_o_piece_drop_count() {
        let drops = enumerate_drops(&TetrisBoard::new(), TetrominoType::O);
        assert_eq!(drops.len(), 9);
        assert!(drops.iter().all(|d| d.lines == 0));
    }

    #[test]
    fn test_i_piece_takes_the_well() {
        // Bottom four rows full except column 9
        let mut board = TetrisBoard::new();
        for y in 16..20 {
            for x in 0..9 {
                board.set(x, y, 1);
            }
        }
        let ranked = ranked_placements(&board, TetrominoType::I, None);
        let best = ranked[0];
        let piece = MoveableTetromino::new(TetrominoType::I, best.first);
        assert!(piece.blocks().iter().all(|&(x, _)| x == 9));
    }

    #[test]
    fn test_pair_scoring_includes_second_piece() {
        let ranked = ranked_placements(
            &TetrisBoard::new(),
            TetrominoType::T,
            Some(TetrominoType::L),
        );
        assert!(!ranked.is_empty());
        assert!(ranked.iter().all(|p| p.second.is_some()));
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
