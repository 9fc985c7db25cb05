//! # Shared Networking Core
//!
//! Code used by both the authoritative server and the remote clients:
//!
//! - [`protocol`]: the packed binary wire format, opcodes and packet bodies
//! - [`sequence`]: per-sender sequence numbering
//! - [`dispatch`]: the single place where an opcode is bound to a handler
//! - [`io`]: the dedicated I/O thread that receives datagrams and hands
//!   them to a queue for the game loop to drain
//! - [`error`]: protocol and transport setup errors
//!
//! Neither peer ever runs application code on the I/O thread. The receive
//! loop only copies bytes out of the socket; decoding and handler calls
//! happen when the game loop drains its queue.

pub mod dispatch;
pub mod error;
pub mod io;
pub mod protocol;
pub mod sequence;

pub use dispatch::{dispatch, route, PacketHandler};
pub use error::{NetError, ProtocolError};
pub use io::{Inbound, IoContext};
pub use protocol::{
    entity_type, EntityDead, EntityPosition, EntitySpawn, Frame, Header, HealthUpdate, InputMask,
    LoginResponse, OpCode, Packet, ScoreUpdate, Username, HEADER_SIZE, MAX_DATAGRAM_SIZE,
    USERNAME_LEN,
};
pub use sequence::{sequence_greater_than, SequenceCounter};

/// Default UDP port for the game server.
pub const DEFAULT_PORT: u16 = 8080;
