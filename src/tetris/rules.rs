//! NES scoring, gravity and level progression.

/// Frames per second of the emulated console.
pub const FRAMES_PER_SECOND: u32 = 60;

/// Base points for clearing 0..=4 lines at once.
const LINE_CLEAR_POINTS: [u32; 5] = [0, 40, 100, 300, 1200];

/// Frames per gravity row at levels 0..=18.
const GRAVITY_TABLE: [u8; 19] = [48, 43, 38, 33, 28, 23, 18, 13, 8, 6, 5, 5, 5, 4, 4, 4, 3, 3, 3];

/// Frames the active piece waits before falling one row.
pub fn gravity_frames(level: u8) -> u8 {
    match level {
        0..=18 => GRAVITY_TABLE[level as usize],
        19..=28 => 2,
        _ => 1,
    }
}

/// Points for a line clear, using the level before the clear.
pub fn line_clear_score(lines: u8, level: u8) -> u32 {
    let base = LINE_CLEAR_POINTS
        .get(lines as usize)
        .copied()
        .unwrap_or(LINE_CLEAR_POINTS[4]);
    base * (level as u32 + 1)
}

/// Lines needed before the first level transition.
pub fn first_transition_lines(start_level: u8) -> u32 {
    let start = start_level as u32;
    (start * 10 + 10).min(100u32.max((start * 10).saturating_sub(50)))
}

/// Level reached after clearing `lines` total, starting from `start_level`.
pub fn level_for_lines(start_level: u8, lines: u32) -> u8 {
    let transition = first_transition_lines(start_level);
    if lines < transition {
        return start_level;
    }
    let extra = 1 + (lines - transition) / 10;
    (start_level as u32 + extra).min(u8::MAX as u32) as u8
}
