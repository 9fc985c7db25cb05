//! Error types shared by both peers

use std::net::SocketAddr;

/// Reasons a datagram could not be turned into a [`Frame`](crate::protocol::Frame).
///
/// None of these ever reach application code: receivers log them at debug
/// level and drop the datagram.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("declared packet size {declared} exceeds datagram length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Failures while setting up or tearing down a transport.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("failed to start network thread: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("transport is already {0}")]
    AlreadyActive(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
