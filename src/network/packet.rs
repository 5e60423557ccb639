//! Binary gameplay packet codec.
//!
//! A packet is one opcode byte followed by a fixed-width bincode payload
//! (little-endian, no length prefix). A frame is any number of packets
//! concatenated. When the server relays a frame it prepends a single byte
//! naming the slot the frame came from so recipients can demultiplex.
//!
//! ```text
//! client -> server:  [op][payload][op][payload]...
//! server -> others:  [slot][op][payload][op][payload]...
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tetris::{
    GameFullState, GameRecovery, MtPose, PackedBoard, TetrisBoard, TetrominoType,
};

// =============================================================================
// OPCODES
// =============================================================================

/// Packet opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// A new game begins.
    GameStart = 0,
    /// Countdown value changed.
    Countdown = 1,
    /// A piece locked.
    Placement = 2,
    /// Only the active piece moved.
    AbbrBoard = 3,
    /// Whole board.
    FullBoard = 4,
    /// The game ended.
    GameEnd = 5,
    /// Full snapshot.
    Recovery = 6,
    /// Full state replacement.
    FullState = 7,
    /// Placement quality reported by the evaluation engine.
    Evaluation = 8,
}

impl Opcode {
    /// Parse an opcode byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Opcode::GameStart,
            1 => Opcode::Countdown,
            2 => Opcode::Placement,
            3 => Opcode::AbbrBoard,
            4 => Opcode::FullBoard,
            5 => Opcode::GameEnd,
            6 => Opcode::Recovery,
            7 => Opcode::FullState,
            8 => Opcode::Evaluation,
            _ => return None,
        })
    }
}

/// Codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Opcode byte not recognised.
    #[error("Unknown opcode {0}")]
    UnknownOpcode(u8),
    /// Frame ended in the middle of a packet.
    #[error("Frame truncated")]
    Truncated,
    /// Payload could not be decoded.
    #[error("Malformed payload: {0}")]
    Malformed(String),
    /// Piece index out of range.
    #[error("Invalid piece type {0}")]
    InvalidPiece(u8),
}

impl From<bincode::Error> for PacketError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                PacketError::Truncated
            }
            other => PacketError::Malformed(other.to_string()),
        }
    }
}

// =============================================================================
// PACKETS
// =============================================================================

/// A decoded gameplay packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// A new game begins.
    GameStart {
        /// Start level.
        level: u8,
        /// First piece.
        current: TetrominoType,
        /// Preview piece.
        next: TetrominoType,
    },
    /// Countdown value changed.
    Countdown {
        /// Milliseconds since the previous packet.
        delta_ms: u16,
        /// New value (see the `COUNTDOWN_*` constants).
        countdown: u8,
    },
    /// A piece locked.
    Placement {
        /// Piece after the new preview.
        next_next: TetrominoType,
        /// Final pose of the locked piece.
        pose: MtPose,
        /// Pushdown points earned.
        pushdown: u8,
    },
    /// Only the active piece moved.
    AbbrBoard {
        /// Milliseconds since the previous packet.
        delta_ms: u16,
        /// Active piece pose.
        pose: MtPose,
    },
    /// Whole board.
    FullBoard {
        /// Milliseconds since the previous packet.
        delta_ms: u16,
        /// Board as displayed.
        board: TetrisBoard,
    },
    /// The game ended.
    GameEnd,
    /// Full snapshot.
    Recovery(Box<GameRecovery>),
    /// Full state replacement.
    FullState(Box<GameFullState>),
    /// Placement quality from the evaluation engine.
    Evaluation {
        /// Score of the best placement.
        best_eval: f32,
        /// Score of the placement actually made.
        player_eval: f32,
    },
}

impl Packet {
    /// Opcode of this packet.
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::GameStart { .. } => Opcode::GameStart,
            Packet::Countdown { .. } => Opcode::Countdown,
            Packet::Placement { .. } => Opcode::Placement,
            Packet::AbbrBoard { .. } => Opcode::AbbrBoard,
            Packet::FullBoard { .. } => Opcode::FullBoard,
            Packet::GameEnd => Opcode::GameEnd,
            Packet::Recovery(_) => Opcode::Recovery,
            Packet::FullState(_) => Opcode::FullState,
            Packet::Evaluation { .. } => Opcode::Evaluation,
        }
    }

    /// Append the encoded packet to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), PacketError> {
        out.push(self.opcode() as u8);
        match self {
            Packet::GameStart { level, current, next } => write(
                out,
                &StartWire {
                    level: *level,
                    current: current.index(),
                    next: next.index(),
                },
            ),
            Packet::Countdown { delta_ms, countdown } => write(
                out,
                &CountdownWire {
                    delta_ms: *delta_ms,
                    countdown: *countdown,
                },
            ),
            Packet::Placement { next_next, pose, pushdown } => write(
                out,
                &PlacementWire {
                    next_next: next_next.index(),
                    pose: *pose,
                    pushdown: *pushdown,
                },
            ),
            Packet::AbbrBoard { delta_ms, pose } => write(
                out,
                &AbbrWire {
                    delta_ms: *delta_ms,
                    pose: *pose,
                },
            ),
            Packet::FullBoard { delta_ms, board } => write(
                out,
                &FullBoardWire {
                    delta_ms: *delta_ms,
                    board: board.to_packed(),
                },
            ),
            Packet::GameEnd => Ok(()),
            Packet::Recovery(recovery) => write(out, &RecoveryWire::from(recovery.as_ref())),
            Packet::FullState(full) => write(out, &FullStateWire::from(full.as_ref())),
            Packet::Evaluation { best_eval, player_eval } => write(
                out,
                &EvaluationWire {
                    best_eval: *best_eval,
                    player_eval: *player_eval,
                },
            ),
        }
    }

    /// Encode as a standalone frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decode one packet from the front of `input`, advancing it.
    pub fn decode_from(input: &mut &[u8]) -> Result<Packet, PacketError> {
        let (&op, rest) = input.split_first().ok_or(PacketError::Truncated)?;
        *input = rest;
        let opcode = Opcode::from_u8(op).ok_or(PacketError::UnknownOpcode(op))?;

        let packet = match opcode {
            Opcode::GameStart => {
                let wire: StartWire = read(input)?;
                Packet::GameStart {
                    level: wire.level,
                    current: piece(wire.current)?,
                    next: piece(wire.next)?,
                }
            }
            Opcode::Countdown => {
                let wire: CountdownWire = read(input)?;
                Packet::Countdown {
                    delta_ms: wire.delta_ms,
                    countdown: wire.countdown,
                }
            }
            Opcode::Placement => {
                let wire: PlacementWire = read(input)?;
                Packet::Placement {
                    next_next: piece(wire.next_next)?,
                    pose: wire.pose,
                    pushdown: wire.pushdown,
                }
            }
            Opcode::AbbrBoard => {
                let wire: AbbrWire = read(input)?;
                Packet::AbbrBoard {
                    delta_ms: wire.delta_ms,
                    pose: wire.pose,
                }
            }
            Opcode::FullBoard => {
                let wire: FullBoardWire = read(input)?;
                Packet::FullBoard {
                    delta_ms: wire.delta_ms,
                    board: TetrisBoard::from_packed(&wire.board),
                }
            }
            Opcode::GameEnd => Packet::GameEnd,
            Opcode::Recovery => {
                let wire: RecoveryWire = read(input)?;
                Packet::Recovery(Box::new(wire.try_into()?))
            }
            Opcode::FullState => {
                let wire: FullStateWire = read(input)?;
                Packet::FullState(Box::new(wire.try_into()?))
            }
            Opcode::Evaluation => {
                let wire: EvaluationWire = read(input)?;
                Packet::Evaluation {
                    best_eval: wire.best_eval,
                    player_eval: wire.player_eval,
                }
            }
        };

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(?packet, "decoded packet");

        Ok(packet)
    }
}

fn write<T: Serialize>(out: &mut Vec<u8>, wire: &T) -> Result<(), PacketError> {
    bincode::serialize_into(out, wire)?;
    Ok(())
}

fn read<T: serde::de::DeserializeOwned>(input: &mut &[u8]) -> Result<T, PacketError> {
    Ok(bincode::deserialize_from(input)?)
}

fn piece(index: u8) -> Result<TetrominoType, PacketError> {
    TetrominoType::from_index(index).ok_or(PacketError::InvalidPiece(index))
}

// =============================================================================
// WIRE PAYLOADS
// =============================================================================

#[derive(Serialize, Deserialize)]
struct StartWire {
    level: u8,
    current: u8,
    next: u8,
}

#[derive(Serialize, Deserialize)]
struct CountdownWire {
    delta_ms: u16,
    countdown: u8,
}

#[derive(Serialize, Deserialize)]
struct PlacementWire {
    next_next: u8,
    pose: MtPose,
    pushdown: u8,
}

#[derive(Serialize, Deserialize)]
struct AbbrWire {
    delta_ms: u16,
    pose: MtPose,
}

#[derive(Serialize, Deserialize)]
struct FullBoardWire {
    delta_ms: u16,
    board: PackedBoard,
}

#[derive(Serialize, Deserialize)]
struct RecoveryWire {
    start_level: u8,
    level: u8,
    lines: u16,
    score: u32,
    countdown: u8,
    current: u8,
    next: u8,
    tetris_count: u16,
    num_placements: u16,
    isolated_board: PackedBoard,
    display_board: PackedBoard,
    active: Option<MtPose>,
}

impl From<&GameRecovery> for RecoveryWire {
    fn from(r: &GameRecovery) -> Self {
        Self {
            start_level: r.start_level,
            level: r.level,
            lines: r.lines,
            score: r.score,
            countdown: r.countdown,
            current: r.current.index(),
            next: r.next.index(),
            tetris_count: r.tetris_count,
            num_placements: r.num_placements,
            isolated_board: r.isolated_board.to_packed(),
            display_board: r.display_board.to_packed(),
            active: r.active,
        }
    }
}

impl TryFrom<RecoveryWire> for GameRecovery {
    type Error = PacketError;

    fn try_from(w: RecoveryWire) -> Result<Self, Self::Error> {
        Ok(Self {
            start_level: w.start_level,
            level: w.level,
            lines: w.lines,
            score: w.score,
            countdown: w.countdown,
            current: piece(w.current)?,
            next: piece(w.next)?,
            tetris_count: w.tetris_count,
            num_placements: w.num_placements,
            isolated_board: TetrisBoard::from_packed(&w.isolated_board),
            display_board: TetrisBoard::from_packed(&w.display_board),
            active: w.active,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct FullStateWire {
    board: PackedBoard,
    current: u8,
    next: u8,
    level: u8,
    lines: u16,
    score: u32,
}

impl From<&GameFullState> for FullStateWire {
    fn from(f: &GameFullState) -> Self {
        Self {
            board: f.board.to_packed(),
            current: f.current.index(),
            next: f.next.index(),
            level: f.level,
            lines: f.lines,
            score: f.score,
        }
    }
}

impl TryFrom<FullStateWire> for GameFullState {
    type Error = PacketError;

    fn try_from(w: FullStateWire) -> Result<Self, Self::Error> {
        Ok(Self {
            board: TetrisBoard::from_packed(&w.board),
            current: piece(w.current)?,
            next: piece(w.next)?,
            level: w.level,
            lines: w.lines,
            score: w.score,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct EvaluationWire {
    best_eval: f32,
    player_eval: f32,
}

// =============================================================================
// FRAMES
// =============================================================================

/// Batches packets into one frame.
#[derive(Debug, Default, Clone)]
pub struct PacketAssembler {
    buffer: Vec<u8>,
    count: usize,
}

impl PacketAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet.
    pub fn push(&mut self, packet: &Packet) -> Result<(), PacketError> {
        packet.encode_into(&mut self.buffer)?;
        self.count += 1;
        Ok(())
    }

    /// Number of packets batched.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when nothing is batched.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Take the frame and reset.
    pub fn take(&mut self) -> Vec<u8> {
        self.count = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// Prefix a frame with the originating slot.
pub fn encode_slot_frame(slot: u8, frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 1);
    out.push(slot);
    out.extend_from_slice(frame);
    out
}

/// Split a relayed frame into its slot and packet bytes.
pub fn decode_slot_frame(data: &[u8]) -> Result<(u8, PacketDisassembler<'_>), PacketError> {
    let (&slot, rest) = data.split_first().ok_or(PacketError::Truncated)?;
    Ok((slot, PacketDisassembler::new(rest)))
}

/// Iterates the packets of a frame. Stops after the first error.
#[derive(Debug, Clone)]
pub struct PacketDisassembler<'a> {
    rest: &'a [u8],
}

impl<'a> PacketDisassembler<'a> {
    /// Iterate `frame`.
    pub fn new(frame: &'a [u8]) -> Self {
        Self { rest: frame }
    }

    /// Decode the whole frame, failing on the first bad packet.
    pub fn collect_all(self) -> Result<Vec<Packet>, PacketError> {
        self.collect()
    }
}

impl Iterator for PacketDisassembler<'_> {
    type Item = Result<Packet, PacketError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let result = Packet::decode_from(&mut self.rest);
        if result.is_err() {
            self.rest = &[];
        }
        Some(result)
    }
}
