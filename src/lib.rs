//! # Stack Arena Server
//!
//! Authoritative room, matchmaking and bot server for competitive classic
//! block-stacking.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    STACK ARENA SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Seeded PRNG, env helpers                  │
//! │                                                              │
//! │  tetris/         - Game rules (deterministic)                │
//! │  ├── board.rs    - 10x20 board, packing                      │
//! │  ├── piece_sequence.rs - Seeded piece generator             │
//! │  ├── game_state.rs - Score/level/lines bookkeeping           │
//! │  ├── emulator.rs - Frame-by-frame game emulator              │
//! │  └── analysis.rs - Placement enumeration and scoring         │
//! │                                                              │
//! │  network/        - Wire formats and transport                │
//! │  ├── packet.rs   - Binary gameplay packet codec              │
//! │  ├── emitter.rs  - Emulator -> packet stream                 │
//! │  ├── protocol.rs - JSON control messages                     │
//! │  ├── session.rs  - Session directory and fan-out             │
//! │  ├── auth.rs     - JWT handshake                             │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  room/           - Solo, multiplayer, ranked, puzzle rooms   │
//! │  matchmaking/    - Ranked queue, ELO, abort suspension       │
//! │  user/           - User records and store                    │
//! │  bot/            - Placement AI and ranked bots              │
//! │  context.rs      - Message routing for all sessions          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Everything under `tetris/` is a pure function of its seed and inputs:
//! a client and the server replaying the same piece-sequence seed with the
//! same key presses reach the same board, score and level.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bot;
pub mod context;
pub mod core;
pub mod matchmaking;
pub mod network;
pub mod room;
pub mod tetris;
pub mod user;

// Re-export commonly used types
pub use context::ServerContext;
pub use core::rng::DeterministicRng;
pub use network::packet::Packet;
pub use room::{RoomConfig, RoomRegistry, RoomState};
pub use tetris::{Emulator, TetrisBoard, TetrominoType};
pub use user::{InMemoryUserStore, UserRecord, UserStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
