//! Error taxonomy for the packet layer and the protocol engine (§7).

use crate::packet::StatusCode;

/// Errors from packet encode/decode, independent of how the bytes
/// arrived on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("invalid command code: {0}")]
    InvalidCommand(u8),
    #[error("invalid status code: {0}")]
    InvalidStatus(u8),
}

/// Errors decoding the client-info TLV block (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientInfoDecodeError {
    #[error("unknown client-info TLV type {0}")]
    UnknownType(u8),
    #[error("TLV type {ty} has an invalid length {len} for its field")]
    BadFieldLength { ty: u8, len: u8 },
    #[error("TLV payload is truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error(
        "command-timeout override for command code {0} appeared before the default timeout entry"
    )]
    DefaultTimeoutNotFirst(u8),
    #[error("client info is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Terminal and recoverable errors raised by the protocol engine (§7).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] mdfu_transport::TransportError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    ClientInfoDecode(#[from] ClientInfoDecodeError),

    #[error("image reader failed: {0}")]
    Image(#[from] std::io::Error),

    #[error(
        "client protocol version {client_major}.{client_minor}.{client_patch} is newer than host version {host_major}.{host_minor}.{host_patch}"
    )]
    VersionMismatch {
        client_major: u8,
        client_minor: u8,
        client_patch: u8,
        host_major: u8,
        host_minor: u8,
        host_patch: u8,
    },

    #[error(
        "client buffer_size {buffer_size} exceeds MAX_CMD_DATA {max_cmd_data}"
    )]
    BufferTooSmall { buffer_size: u16, max_cmd_data: usize },

    #[error("command failed with status {status:?} (cause byte {cause_byte:?})")]
    ProtocolError { status: StatusCode, cause_byte: Option<u8> },

    #[error("image state reported invalid (got byte {got:?}, expected 1)")]
    ImageInvalid { got: Option<u8> },

    #[error("retries exhausted ({retries}) without a successful exchange")]
    RetriesExhausted { retries: u8 },
}

impl EngineError {
    /// `true` if the engine's send-and-receive loop should retry rather
    /// than surface this to the orchestrator (§7 propagation policy).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}
