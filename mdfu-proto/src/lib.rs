//! The MDFU packet layer and protocol engine: §3 and §4.4 of the MDFU
//! spec. Sits atop `mdfu-transport`'s framing/retrieval state machines
//! and exposes the session-scoped engine the orchestrator drives.

pub mod client_info;
pub mod engine;
pub mod error;
pub mod image;
pub mod packet;

pub use client_info::{ClientInfo, Version};
pub use engine::{MdfuEngine, SessionState};
pub use error::{ClientInfoDecodeError, EngineError, PacketError};
pub use image::ImageReader;
pub use packet::{CommandCode, Packet, StatusCode};

/// Maximum command payload a client may advertise via `buffer_size`
/// (§6). Build-time constant; the engine rejects discovery if a client
/// advertises more than this.
pub const MAX_CMD_DATA: usize = 1024;

/// Maximum status-response payload (§6).
pub const MAX_RSP_DATA: usize = 30;

/// `cause_byte` values at or above this are not meaningful causes
/// (Design Notes open question: "code >= MAX_CAUSE" is invalid).
pub const MAX_CAUSE: u8 = 32;
