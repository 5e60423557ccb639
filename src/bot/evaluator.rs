//! Placement evaluation.
//!
//! Bots ask an [`Evaluator`] for candidate placements ranked best first. The
//! built-in [`HeuristicEvaluator`] scores straight hard drops statically; an
//! external engine can be plugged in behind the same trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::tetris::analysis::ranked_placements;
use crate::tetris::{MtPose, TetrisBoard, TetrominoType};

/// Heuristic scores are multiplied by this to land on the engine's scale.
const HEURISTIC_EVAL_SCALE: f64 = 4.0;
/// Steepness of [`rescale_eval`].
const RESCALE_SPREAD: f64 = 40.0;

/// Evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The engine could not be reached or answered with garbage.
    #[error("Evaluation engine unavailable: {0}")]
    Unavailable(String),
    /// The position was rejected.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

/// Position to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    /// Locked cells.
    pub board: TetrisBoard,
    /// Piece to place.
    pub current: TetrominoType,
    /// Preview piece.
    pub next: Option<TetrominoType>,
    /// Level.
    pub level: u8,
    /// Lines cleared so far.
    pub lines: u16,
    /// Input timeline (`X` = input allowed on that frame).
    pub input_timeline: String,
    /// Search depth.
    pub depth: u8,
}

/// One candidate, with the engine's evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePlacement {
    /// Final pose of the current piece.
    pub first: MtPose,
    /// Follow-up pose of the next piece, when known.
    pub second: Option<MtPose>,
    /// Evaluation, higher is better.
    pub eval: f64,
}

/// Source of ranked candidate placements.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Candidates for `request`, best first. May be empty.
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<Vec<CandidatePlacement>, EvaluationError>;
}

/// Static hard-drop evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

#[async_trait]
impl Evaluator for HeuristicEvaluator {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<Vec<CandidatePlacement>, EvaluationError> {
        let ranked = ranked_placements(&request.board, request.current, request.next);
        Ok(ranked
            .into_iter()
            .filter(|p| p.score.is_finite())
            .map(|p| CandidatePlacement {
                first: p.first,
                second: p.second,
                eval: p.score * HEURISTIC_EVAL_SCALE,
            })
            .collect())
    }
}

/// Map an evaluation onto 0..100 so that differences near the top count
/// more than differences between already-lost positions.
pub fn rescale_eval(eval: f64) -> f64 {
    100.0 / (1.0 + (-eval / RESCALE_SPREAD).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tetris::MoveableTetromino;

    fn request(board: TetrisBoard, current: TetrominoType, next: Option<TetrominoType>) -> EvaluationRequest {
        EvaluationRequest {
            board,
            current,
            next,
            level: 18,
            lines: 0,
            input_timeline: "X.....".into(),
            depth: 1,
        }
    }

    #[tokio::test]
    async fn test_heuristic_ranks_best_first() {
        let candidates = HeuristicEvaluator
            .evaluate(&request(TetrisBoard::new(), TetrominoType::T, Some(TetrominoType::O)))
            .await
            .unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.windows(2).all(|w| w[0].eval >= w[1].eval));
        assert!(candidates.iter().all(|c| c.second.is_some()));
    }

    #[tokio::test]
    async fn test_heuristic_finds_the_well() {
        let mut board = TetrisBoard::new();
        for y in 16..20 {
            for x in 0..9 {
                board.set(x, y, 1);
            }
        }
        let candidates = HeuristicEvaluator
            .evaluate(&request(board, TetrominoType::I, None))
            .await
            .unwrap();
        let best = MoveableTetromino::new(TetrominoType::I, candidates[0].first);
        assert!(best.blocks().iter().all(|&(x, _)| x == 9));
    }

    #[test]
    fn test_rescale_is_monotonic() {
        assert!((rescale_eval(0.0) - 50.0).abs() < 1e-9);
        assert!(rescale_eval(10.0) > rescale_eval(0.0));
        assert!(rescale_eval(-200.0) < 1.0);
        assert!(rescale_eval(200.0) > 99.0);
    }
}
