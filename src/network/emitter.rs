//! Client-side packet emission.
//!
//! Decides, frame by frame, which packets a playing client sends. Boards are
//! sent abbreviated (active piece pose only) whenever the locked cells are
//! unchanged and in full otherwise.

use crate::network::packet::Packet;
use crate::tetris::rules::FRAMES_PER_SECOND;
use crate::tetris::{Emulator, TetrisBoard, COUNTDOWN_LINECAP_REACHED};

/// Tracks what has already been sent for one game.
#[derive(Debug, Clone)]
pub struct GameStreamEmitter {
    last_countdown: u8,
    was_locked: bool,
    last_board: TetrisBoard,
    frames_since_packet: u32,
    ended: bool,
}

impl GameStreamEmitter {
    /// Packets that open a game: START, the initial countdown and the spawn pose.
    pub fn start(emulator: &Emulator) -> (Self, Vec<Packet>) {
        let mut packets = vec![
            Packet::GameStart {
                level: emulator.start_level(),
                current: emulator.current(),
                next: emulator.next(),
            },
            Packet::Countdown {
                delta_ms: 0,
                countdown: emulator.countdown(),
            },
        ];
        if let Some(piece) = emulator.active_piece() {
            packets.push(Packet::AbbrBoard {
                delta_ms: 0,
                pose: piece.pose,
            });
        }

        let emitter = Self {
            last_countdown: emulator.countdown(),
            was_locked: emulator.is_piece_locked(),
            last_board: emulator.display_board(),
            frames_since_packet: 0,
            ended: false,
        };
        (emitter, packets)
    }

    /// Packets describing the frame the emulator just executed.
    pub fn after_frame(&mut self, emulator: &Emulator) -> Vec<Packet> {
        let mut packets = Vec::new();
        if self.ended {
            return packets;
        }
        self.frames_since_packet += 1;

        let countdown = emulator.countdown();
        if countdown != self.last_countdown {
            self.last_countdown = countdown;
            packets.push(Packet::Countdown {
                delta_ms: self.take_delta(),
                countdown,
            });
        }

        let locked = emulator.is_piece_locked();
        if locked && !self.was_locked {
            if let Some(lock) = emulator.last_lock() {
                packets.push(Packet::Placement {
                    next_next: emulator.next_next(),
                    pose: lock.piece.pose,
                    pushdown: lock.pushdown,
                });
            }
        }
        self.was_locked = locked;

        let board = emulator.display_board();
        if board != self.last_board {
            let delta_ms = self.take_delta();
            let packet = match emulator.active_piece() {
                Some(piece) => Packet::AbbrBoard {
                    delta_ms,
                    pose: piece.pose,
                },
                None => Packet::FullBoard {
                    delta_ms,
                    board: board.clone(),
                },
            };
            packets.push(packet);
            self.last_board = board;
        }

        if emulator.reached_level_cap() {
            packets.push(Packet::Countdown {
                delta_ms: self.take_delta(),
                countdown: COUNTDOWN_LINECAP_REACHED,
            });
        }

        if emulator.is_over() {
            packets.push(Packet::GameEnd);
            self.ended = true;
        }

        packets
    }

    /// True once END has been emitted.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn take_delta(&mut self) -> u16 {
        let ms = self.frames_since_packet * 1000 / FRAMES_PER_SECOND;
        self.frames_since_packet = 0;
        ms.min(u16::MAX as u32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tetris::{GameState, InputKey, KeyState};

    fn apply(state: &mut GameState, packet: &Packet) {
        match packet {
            Packet::Countdown { countdown, .. } => state.on_countdown(*countdown),
            Packet::Placement { next_next, pose, pushdown } => {
                state.on_placement(*next_next, *pose, *pushdown);
            }
            Packet::AbbrBoard { pose, .. } => state.on_abbr_board(*pose),
            Packet::FullBoard { board, .. } => state.on_full_board(board.clone()),
            _ => {}
        }
    }

    #[test]
    fn test_opening_sequence() {
        let emu = Emulator::new(18, "0a0b0c", 3, None).unwrap();
        let (_, packets) = GameStreamEmitter::start(&emu);
        assert!(matches!(packets[0], Packet::GameStart { level: 18, .. }));
        assert!(matches!(packets[1], Packet::Countdown { countdown: 3, .. }));
        assert!(matches!(packets[2], Packet::AbbrBoard { .. }));
    }

    #[test]
    fn test_stream_tracks_emulator() {
        let mut emu = Emulator::new(18, "0a0b0c", 1, None).unwrap();
        let (mut emitter, opening) = GameStreamEmitter::start(&emu);
        let mut state = GameState::new(emu.start_level(), emu.current(), emu.next());
        for p in &opening[1..] {
            apply(&mut state, p);
        }

        let mut frame = 0u32;
        let mut saw_end = false;
        while !emitter.is_ended() {
            // Alternate shifting and holding pushdown so pieces spread out
            let keys = match frame % 40 {
                0 => KeyState::from(InputKey::ShiftLeft),
                20 => KeyState::from(InputKey::ShiftRight),
                5..=15 => KeyState::from(InputKey::Pushdown),
                _ => KeyState::NONE,
            };
            emu.execute_frame(keys);
            for p in emitter.after_frame(&emu) {
                saw_end |= p == Packet::GameEnd;
                apply(&mut state, &p);
            }
            frame += 1;
            assert!(frame < 200_000);
        }

        assert!(saw_end);
        assert_eq!(state.score(), emu.score());
        assert_eq!(state.lines(), emu.lines());
        assert_eq!(state.level(), emu.level());
        assert_eq!(state.num_placements(), emu.num_placements());
        assert_eq!(state.isolated_board(), emu.board());
    }
}
