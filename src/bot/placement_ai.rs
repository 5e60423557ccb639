//! Placement choice and input planning for bots.
//!
//! For every piece the bot registers the position it will face. The
//! evaluator runs in a background task; once it answers, the chosen pose is
//! turned into a [`ShiftMap`]: which keys to press on which frame of the
//! piece's life, limited by the bot's input timeline. Until the plan
//! arrives the piece simply falls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::evaluator::{rescale_eval, CandidatePlacement, EvaluationRequest, Evaluator};
use crate::core::DeterministicRng;
use crate::tetris::rules::gravity_frames;
use crate::tetris::{InputKey, KeyState, MoveableTetromino, TetrisBoard, TetrominoType, SPAWN_POSE};

/// Engine level floor; the engine plays every position as if at least this fast.
const MIN_ENGINE_LEVEL: u8 = 18;
/// First placement picks among this many top candidates.
const FIRST_PLACEMENT_POOL: usize = 5;
/// Reported eval drop for a misdropped piece.
const MISDROP_EVAL_PENALTY: f64 = 20.0;

// =============================================================================
// CONFIG
// =============================================================================

/// Physical input rate a bot is limited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputSpeed {
    /// 5 inputs per second.
    #[serde(rename = "HZ_5")]
    Hz5,
    /// 6 inputs per second.
    #[serde(rename = "HZ_6")]
    Hz6,
    /// About 7 inputs per second.
    #[serde(rename = "HZ_7")]
    Hz7,
    /// 8 inputs per second.
    #[serde(rename = "HZ_8")]
    Hz8,
    /// 10 inputs per second.
    #[serde(rename = "HZ_10")]
    Hz10,
    /// 12 inputs per second.
    #[serde(rename = "HZ_12")]
    Hz12,
    /// 15 inputs per second.
    #[serde(rename = "HZ_15")]
    Hz15,
    /// 20 inputs per second.
    #[serde(rename = "HZ_20")]
    Hz20,
    /// 30 inputs per second.
    #[serde(rename = "HZ_30")]
    Hz30,
}

impl InputSpeed {
    /// Repeating frame pattern; `X` marks a frame that accepts input.
    pub fn timeline(self) -> &'static str {
        match self {
            InputSpeed::Hz5 => "X...........",
            InputSpeed::Hz6 => "X.........",
            InputSpeed::Hz7 => "X.......X........",
            InputSpeed::Hz8 => "X......X.......",
            InputSpeed::Hz10 => "X.....",
            InputSpeed::Hz12 => "X....",
            InputSpeed::Hz15 => "X...",
            InputSpeed::Hz20 => "X..",
            InputSpeed::Hz30 => "X.",
        }
    }
}

/// How a bot plays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    /// Input rate.
    pub input_speed: InputSpeed,
    /// Chance per placement of a slightly worse move.
    pub inaccuracy: f64,
    /// Chance per placement of a clearly worse move.
    pub mistake: f64,
    /// Chance per placement of one stray keypress.
    pub misdrop: f64,
}

impl AiConfig {
    /// Config with no deliberate errors.
    pub fn flawless(input_speed: InputSpeed) -> Self {
        Self {
            input_speed,
            inaccuracy: 0.0,
            mistake: 0.0,
            misdrop: 0.0,
        }
    }
}

// =============================================================================
// PLACEMENT CHOICE
// =============================================================================

/// Error kinds rolled for one placement. At most one is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementErrors {
    /// Add a stray keypress.
    pub misdrop: bool,
    /// Pick a clearly worse move.
    pub mistake: bool,
    /// Pick a slightly worse move.
    pub inaccuracy: bool,
}

/// Error chances scale up as gravity gets faster.
pub fn error_multiplier(level: u8) -> f64 {
    match gravity_frames(level) {
        3 => 1.0,
        2 => 2.0,
        1 => 2.5,
        _ => 0.75,
    }
}

/// Roll this placement's errors: misdrop first, then mistake, then inaccuracy.
pub fn random_error(config: &AiConfig, level: u8, rng: &mut DeterministicRng) -> PlacementErrors {
    let multiplier = error_multiplier(level);
    let misdrop = rng.chance(config.misdrop * multiplier);
    let mistake = !misdrop && rng.chance(config.mistake * multiplier);
    let inaccuracy = !misdrop && !mistake && rng.chance(config.inaccuracy * multiplier);
    PlacementErrors {
        misdrop,
        mistake,
        inaccuracy,
    }
}

/// What the bot decided for one piece.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiPlacement {
    /// Lock pose, or `None` to let the piece fall where it falls.
    pub placement: Option<MoveableTetromino>,
    /// Evaluation of the best candidate.
    pub best_eval: f64,
    /// Evaluation reported for the move made.
    pub player_eval: f64,
}

impl AiPlacement {
    /// No candidate available.
    pub fn none() -> Self {
        Self {
            placement: None,
            best_eval: 10.0,
            player_eval: 0.0,
        }
    }
}

/// Pick one of `candidates` (best first).
pub fn choose_placement(
    kind: TetrominoType,
    candidates: &[CandidatePlacement],
    errors: PlacementErrors,
    is_first: bool,
    rng: &mut DeterministicRng,
) -> AiPlacement {
    let Some(best) = candidates.first() else {
        return AiPlacement::none();
    };
    let best_eval = best.eval;
    let pick = |c: &CandidatePlacement, player_eval: f64| AiPlacement {
        placement: Some(MoveableTetromino::new(kind, c.first)),
        best_eval,
        player_eval,
    };

    if is_first {
        let pool = &candidates[..candidates.len().min(FIRST_PLACEMENT_POOL)];
        let chosen = rng.choose(pool).unwrap_or(best);
        return pick(chosen, chosen.eval);
    }

    if errors.mistake || errors.inaccuracy {
        let diff = if errors.mistake {
            rng.next_int_range(10, 20)
        } else {
            rng.next_int_range(4, 8)
        };
        let target = rescale_eval(best_eval) - (rescale_eval(f64::from(diff)) - rescale_eval(0.0));
        let distance = |eval: f64| (rescale_eval(eval) - target).abs();
        let closest = candidates
            .iter()
            .min_by(|a, b| distance(a.eval).total_cmp(&distance(b.eval)))
            .unwrap_or(best);
        return pick(closest, closest.eval);
    }

    let wobble = f64::from(rng.next_int_range(0, 300)) / 100.0;
    pick(best, best_eval - wobble)
}

// =============================================================================
// SHIFT MAP
// =============================================================================

/// Keys to press per frame of a piece's life.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftMap {
    /// Frame index to keys pressed on that frame.
    pub map: BTreeMap<i64, Vec<InputKey>>,
    /// Hold pushdown after this frame.
    pub start_pushdown_frame: Option<i64>,
}

impl ShiftMap {
    /// Keys held on `frame`.
    pub fn keys_at(&self, frame: i64) -> KeyState {
        let mut keys = self
            .map
            .get(&frame)
            .into_iter()
            .flatten()
            .fold(KeyState::NONE, |acc, key| acc.with(*key));
        if self.start_pushdown_frame.is_some_and(|start| frame > start) {
            keys = keys.with(InputKey::Pushdown);
        }
        keys
    }
}

/// Inputs that take a spawned piece to `lock`: one rotation and one shift
/// per allowed frame of `timeline`.
pub fn compute_shift_map(
    timeline: &str,
    lock: &MoveableTetromino,
    misdrop: bool,
    rng: &mut DeterministicRng,
) -> ShiftMap {
    let timeline = timeline.as_bytes();
    if !timeline.contains(&b'X') {
        warn!("Input timeline has no input frames");
        return ShiftMap::default();
    }

    let dx = i32::from(lock.pose.x) - i32::from(SPAWN_POSE.x);
    let num_shifts = dx.unsigned_abs();
    let shift_key = if dx > 0 {
        InputKey::ShiftRight
    } else {
        InputKey::ShiftLeft
    };

    let mut num_rotations = (i32::from(lock.pose.rotation) - i32::from(SPAWN_POSE.rotation) + 4).rem_euclid(4) as u32;
    let mut rotation_key = InputKey::RotateRight;
    if num_rotations > 2 {
        num_rotations = 4 - num_rotations;
        rotation_key = InputKey::RotateLeft;
    }

    let mut map: BTreeMap<i64, Vec<InputKey>> = BTreeMap::new();
    let mut frame: i64 = 0;
    let mut shifts = 0;
    let mut rotations = 0;
    while shifts < num_shifts || rotations < num_rotations {
        if timeline[frame as usize % timeline.len()] == b'X' {
            if rotations < num_rotations {
                map.entry(frame).or_default().push(rotation_key);
                rotations += 1;
            }
            if shifts < num_shifts {
                map.entry(frame).or_default().push(shift_key);
                shifts += 1;
            }
        }
        frame += 1;
    }

    if misdrop {
        let spread = rng.next_int_range(0, 50);
        let at = i64::from(rng.next_int_range(0, frame as i32 + spread));
        let key = match rng.next_int(4) {
            0 => InputKey::ShiftLeft,
            1 => InputKey::ShiftRight,
            2 => InputKey::RotateLeft,
            _ => InputKey::RotateRight,
        };
        map.entry(at).or_default().push(key);
    }

    ShiftMap {
        map,
        start_pushdown_frame: Some(frame + i64::from(rng.next_int_range(40, 200))),
    }
}

// =============================================================================
// PLACEMENT AI
// =============================================================================

struct ComputedPlacement {
    index: u32,
    placement: AiPlacement,
    shift_map: ShiftMap,
}

/// Plans every placement of one game.
pub struct PlacementAi {
    config: AiConfig,
    evaluator: Arc<dyn Evaluator>,
    rng: DeterministicRng,
    spawn_delay: i64,
    plans: HashMap<u32, Option<ShiftMap>>,
    computed_tx: mpsc::UnboundedSender<ComputedPlacement>,
    computed_rx: mpsc::UnboundedReceiver<ComputedPlacement>,
    tasks: Vec<JoinHandle<()>>,
}

impl PlacementAi {
    /// New planner. The first piece waits a random 0-150 frames before moving.
    pub fn new(config: AiConfig, evaluator: Arc<dyn Evaluator>, mut rng: DeterministicRng) -> Self {
        let (computed_tx, computed_rx) = mpsc::unbounded_channel();
        let spawn_delay = i64::from(rng.next_int_range(0, 150));
        Self {
            config,
            evaluator,
            rng,
            spawn_delay,
            plans: HashMap::new(),
            computed_tx,
            computed_rx,
            tasks: Vec::new(),
        }
    }

    /// Frames the first piece waits before its first input.
    pub fn spawn_delay(&self) -> i64 {
        self.spawn_delay
    }

    /// Start planning placement `index` for the given position.
    pub fn register_placement(
        &mut self,
        index: u32,
        board: TetrisBoard,
        current: TetrominoType,
        next: Option<TetrominoType>,
        level: u8,
        lines: u16,
    ) {
        let timeline = self.config.input_speed.timeline();
        self.plans.insert(index, None);
        let errors = random_error(&self.config, level, &mut self.rng);
        debug!(index, current = %current, level, ?errors, "Registering placement");

        let request = EvaluationRequest {
            board,
            current,
            next,
            level: level.max(MIN_ENGINE_LEVEL),
            lines,
            input_timeline: timeline.to_string(),
            depth: 1,
        };
        let evaluator = Arc::clone(&self.evaluator);
        let tx = self.computed_tx.clone();
        let mut rng = DeterministicRng::new(self.rng.next_u64());

        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(async move {
            let candidates = match evaluator.evaluate(&request).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    debug!(index, error = %err, "Evaluation failed, letting the piece fall");
                    Vec::new()
                }
            };
            let mut placement = choose_placement(current, &candidates, errors, index == 0, &mut rng);
            let shift_map = match &placement.placement {
                Some(lock) => compute_shift_map(timeline, lock, errors.misdrop, &mut rng),
                None => ShiftMap::default(),
            };
            if errors.misdrop {
                placement.player_eval = placement.best_eval - MISDROP_EVAL_PENALTY;
            }
            if tx
                .send(ComputedPlacement {
                    index,
                    placement,
                    shift_map,
                })
                .is_err()
            {
                debug!(index, "Placement computed after the game ended");
            }
        }));
    }

    fn accept(&mut self, computed: ComputedPlacement) -> AiPlacement {
        self.plans.insert(computed.index, Some(computed.shift_map));
        computed.placement
    }

    /// Plans that finished since the last call.
    pub fn poll_computed(&mut self) -> Vec<AiPlacement> {
        let mut done = Vec::new();
        while let Ok(computed) = self.computed_rx.try_recv() {
            done.push(self.accept(computed));
        }
        done
    }

    /// Wait for the next plan to finish.
    pub async fn next_computed(&mut self) -> Option<AiPlacement> {
        let computed = self.computed_rx.recv().await?;
        Some(self.accept(computed))
    }

    /// True once placement `index` has a plan.
    pub fn is_planned(&self, index: u32) -> bool {
        matches!(self.plans.get(&index), Some(Some(_)))
    }

    /// Keys for placement `index` on `frame` of its life.
    pub fn input_for(&self, index: u32, frame: i64) -> KeyState {
        let frame = if index == 0 {
            frame - self.spawn_delay
        } else {
            frame
        };
        match self.plans.get(&index) {
            Some(Some(plan)) => plan.keys_at(frame),
            _ => KeyState::NONE,
        }
    }
}

impl Drop for PlacementAi {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::evaluator::HeuristicEvaluator;
    use crate::tetris::{Emulator, MtPose};

    fn candidates(evals: &[f64]) -> Vec<CandidatePlacement> {
        evals
            .iter()
            .enumerate()
            .map(|(i, &eval)| CandidatePlacement {
                first: MtPose { rotation: 0, x: i as i8, y: 18 },
                second: None,
                eval,
            })
            .collect()
    }

    #[test]
    fn test_error_multiplier_by_gravity() {
        assert_eq!(error_multiplier(0), 0.75);
        assert_eq!(error_multiplier(16), 1.0);
        assert_eq!(error_multiplier(19), 2.0);
        assert_eq!(error_multiplier(29), 2.5);
    }

    #[test]
    fn test_errors_are_exclusive() {
        let config = AiConfig {
            input_speed: InputSpeed::Hz10,
            inaccuracy: 1.0,
            mistake: 1.0,
            misdrop: 1.0,
        };
        let mut rng = DeterministicRng::new(7);
        let errors = random_error(&config, 18, &mut rng);
        assert_eq!(
            errors,
            PlacementErrors { misdrop: true, mistake: false, inaccuracy: false }
        );

        let flawless = AiConfig::flawless(InputSpeed::Hz10);
        assert_eq!(random_error(&flawless, 29, &mut rng), PlacementErrors::default());
    }

    #[test]
    fn test_choose_best_with_small_wobble() {
        let mut rng = DeterministicRng::new(1);
        let choice = choose_placement(
            TetrominoType::T,
            &candidates(&[30.0, 20.0, 0.0]),
            PlacementErrors::default(),
            false,
            &mut rng,
        );
        assert_eq!(choice.placement.unwrap().pose.x, 0);
        assert_eq!(choice.best_eval, 30.0);
        assert!(choice.player_eval <= 30.0 && choice.player_eval >= 27.0);
    }

    #[test]
    fn test_mistake_picks_lower_candidate() {
        let mut rng = DeterministicRng::new(3);
        let errors = PlacementErrors { mistake: true, ..Default::default() };
        let choice = choose_placement(
            TetrominoType::T,
            &candidates(&[30.0, 29.0, 15.0, -60.0]),
            errors,
            false,
            &mut rng,
        );
        // A 10-20 point drop lands nearest the 15.0 candidate
        assert_eq!(choice.player_eval, 15.0);
    }

    #[test]
    fn test_first_placement_picks_from_top_five() {
        let pool = candidates(&[40.0, 35.0, 30.0, 25.0, 20.0, 15.0, 10.0]);
        let mut picked = Vec::new();
        for seed in 0..64 {
            let mut rng = DeterministicRng::new(seed);
            let choice = choose_placement(
                TetrominoType::L,
                &pool,
                PlacementErrors::default(),
                true,
                &mut rng,
            );
            let index = choice.placement.unwrap().pose.x as usize;
            assert!(index < 5);
            assert_eq!(choice.player_eval, pool[index].eval);
            assert_eq!(choice.best_eval, 40.0);
            picked.push(index);
        }
        assert!(picked.iter().any(|&i| i != 0));
    }

    #[test]
    fn test_no_candidates() {
        let mut rng = DeterministicRng::new(3);
        let choice = choose_placement(TetrominoType::I, &[], PlacementErrors::default(), false, &mut rng);
        assert_eq!(choice, AiPlacement::none());
    }

    #[test]
    fn test_shift_map_respects_timeline() {
        let mut rng = DeterministicRng::new(5);
        // Three rotations right from spawn become one left rotation
        let lock = MoveableTetromino::new(TetrominoType::T, MtPose { rotation: 3, x: 8, y: 10 });
        let plan = compute_shift_map("X..", &lock, false, &mut rng);

        assert_eq!(plan.map.get(&0), Some(&vec![InputKey::RotateLeft, InputKey::ShiftRight]));
        assert_eq!(plan.map.get(&3), Some(&vec![InputKey::ShiftRight]));
        assert_eq!(plan.map.get(&6), Some(&vec![InputKey::ShiftRight]));
        assert_eq!(plan.map.len(), 3);
        let start = plan.start_pushdown_frame.unwrap();
        assert!((7 + 40..=7 + 200).contains(&start));
        assert!(plan.keys_at(start + 1).contains(InputKey::Pushdown));
        assert!(!plan.keys_at(start).contains(InputKey::Pushdown));
    }

    #[test]
    fn test_misdrop_adds_one_key() {
        let mut rng = DeterministicRng::new(11);
        let lock = MoveableTetromino::new(TetrominoType::O, MtPose { rotation: 0, x: 2, y: 10 });
        let clean = compute_shift_map("X.", &lock, false, &mut rng);
        let dropped = compute_shift_map("X.", &lock, true, &mut rng);
        let count = |p: &ShiftMap| p.map.values().map(Vec::len).sum::<usize>();
        assert_eq!(count(&dropped), count(&clean) + 1);
    }

    #[tokio::test]
    async fn test_planned_inputs_reach_the_target() {
        let mut emu = Emulator::new(18, "0a0b0c", 0, None).unwrap();
        let mut ai = PlacementAi::new(
            AiConfig::flawless(InputSpeed::Hz15),
            Arc::new(HeuristicEvaluator),
            DeterministicRng::new(9),
        );
        ai.register_placement(1, emu.board().clone(), emu.current(), Some(emu.next()), 18, 0);
        assert!(!ai.is_planned(1));
        let planned = ai.next_computed().await.unwrap();
        assert!(ai.is_planned(1));
        let target = planned.placement.unwrap();

        // Placement 1 has no spawn delay; play it out
        let mut guard = 0;
        while !emu.is_piece_locked() {
            let frame = i64::from(emu.placement_frame_count());
            emu.execute_frame(ai.input_for(1, frame));
            guard += 1;
            assert!(guard < 1000);
        }
        let locked = emu.last_lock().unwrap().piece;
        assert_eq!(locked.pose.x, target.pose.x);
        assert_eq!(locked.pose.rotation, target.pose.rotation);
    }
}
