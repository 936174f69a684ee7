//! Error types for the link loop, dispatch and emulator lifecycle

use thiserror::Error;

use crate::checksum::ChecksumError;
use crate::packet::{PacketError, MIN_PACKET_LEN};
use crate::persist::PersistError;

/// Errors that end the link loop. The stream cannot be resynchronized, so
/// the PC side has to reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Header announces a {size}-byte packet (minimum {MIN_PACKET_LEN})")]
    PacketTooShort { size: usize },

    #[error("Connection closed after {got} of {expected} packet bytes")]
    TruncatedBody { expected: usize, got: usize },

    #[error("Malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A handler could not build its reply. The session logs it and answers
/// with a generic success instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Malformed request: {0}")]
    Packet(#[from] PacketError),

    #[error("Could not frame ECU block: {0}")]
    Checksum(#[from] ChecksumError),
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("A session is already running")]
    SessionActive,

    #[error("Failed to connect to {path}: {source}")]
    Connect {
        path: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Link thread panicked")]
    LinkPanicked,
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
