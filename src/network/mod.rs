//! Network Layer
//!
//! Everything between a socket and the rooms: the JSON control protocol,
//! the binary gameplay packet codec, the session directory, JWT auth and
//! the WebSocket server.

pub mod auth;
pub mod emitter;
pub mod packet;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, AuthenticatedUser, TokenClaims};
pub use emitter::GameStreamEmitter;
pub use packet::{Opcode, Packet, PacketAssembler, PacketDisassembler, PacketError};
pub use protocol::{ClientMessage, ClientRoomEvent, ErrorCode, QueueType, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{ActivityType, Outbound, SessionDirectory, SessionId};
