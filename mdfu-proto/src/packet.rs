//! The MDFU packet: header byte (sync/resend + 5-bit sequence), command
//! or status code, and payload (§3, §4.4).

use crate::error::PacketError;

const SEQUENCE_MASK: u8 = 0x1F;
const SYNC_BIT: u8 = 0x80;
const RESEND_BIT: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    GetClientInfo = 1,
    StartTransfer = 2,
    WriteChunk = 3,
    GetImageState = 4,
    EndTransfer = 5,
}

impl TryFrom<u8> for CommandCode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CommandCode::GetClientInfo),
            2 => Ok(CommandCode::StartTransfer),
            3 => Ok(CommandCode::WriteChunk),
            4 => Ok(CommandCode::GetImageState),
            5 => Ok(CommandCode::EndTransfer),
            other => Err(PacketError::InvalidCommand(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Success = 1,
    NotSupported = 2,
    NotAuthorized = 3,
    NotExecuted = 4,
    TransferFailure = 5,
    AbortFileTransfer = 6,
}

impl TryFrom<u8> for StatusCode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StatusCode::Success),
            2 => Ok(StatusCode::NotSupported),
            3 => Ok(StatusCode::NotAuthorized),
            4 => Ok(StatusCode::NotExecuted),
            5 => Ok(StatusCode::TransferFailure),
            6 => Ok(StatusCode::AbortFileTransfer),
            other => Err(PacketError::InvalidStatus(other)),
        }
    }
}

/// A command or status packet. Both variants share byte 0's layout
/// (sync/resend flag in one high bit, 5-bit sequence in the low bits)
/// and byte 1 (command or status code); bytes 2.. are the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Command { sync: bool, sequence: u8, command: CommandCode, payload: Vec<u8> },
    Status { resend: bool, sequence: u8, status: StatusCode, payload: Vec<u8> },
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Command { sync, sequence, command, payload } => {
                let mut out = Vec::with_capacity(2 + payload.len());
                let mut header = sequence & SEQUENCE_MASK;
                if *sync {
                    header |= SYNC_BIT;
                }
                out.push(header);
                out.push(*command as u8);
                out.extend_from_slice(payload);
                out
            }
            Packet::Status { resend, sequence, status, payload } => {
                let mut out = Vec::with_capacity(2 + payload.len());
                let mut header = sequence & SEQUENCE_MASK;
                if *resend {
                    header |= RESEND_BIT;
                }
                out.push(header);
                out.push(*status as u8);
                out.extend_from_slice(payload);
                out
            }
        }
    }

    pub fn decode_command(bytes: &[u8]) -> Result<Packet, PacketError> {
        if bytes.len() < 2 {
            return Err(PacketError::InvalidCommand(0));
        }
        let header = bytes[0];
        let sync = header & SYNC_BIT != 0;
        let sequence = header & SEQUENCE_MASK;
        let command = CommandCode::try_from(bytes[1])?;
        Ok(Packet::Command { sync, sequence, command, payload: bytes[2..].to_vec() })
    }

    pub fn decode_status(bytes: &[u8]) -> Result<Packet, PacketError> {
        if bytes.len() < 2 {
            return Err(PacketError::InvalidStatus(0));
        }
        let header = bytes[0];
        let resend = header & RESEND_BIT != 0;
        let sequence = header & SEQUENCE_MASK;
        let status = StatusCode::try_from(bytes[1])?;
        Ok(Packet::Status { resend, sequence, status, payload: bytes[2..].to_vec() })
    }
}
