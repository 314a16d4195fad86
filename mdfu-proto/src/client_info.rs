//! Decoder for the `GET_CLIENT_INFO` TLV payload (§4.4).

use std::collections::HashMap;

use crate::error::ClientInfoDecodeError;
use crate::packet::CommandCode;

const TYPE_PROTOCOL_VERSION: u8 = 1;
const TYPE_BUFFER_INFO: u8 = 2;
const TYPE_COMMAND_TIMEOUT: u8 = 3;
const TYPE_INTER_TRANSACTION_DELAY: u8 = 4;

/// The bootstrap default timeout (in 100 ms units) used when the client
/// never sends a `COMMAND_TIMEOUT` record at all.
const DEFAULT_TIMEOUT_100MS: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub internal: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub version: Version,
    pub buffer_size: u16,
    pub buffer_count: u8,
    pub default_timeout: u16,
    pub cmd_timeouts: HashMap<CommandCode, u16>,
    pub inter_transaction_delay: u32,
}

impl ClientInfo {
    /// The timeout to use for `command`, in 100 ms units: the per-command
    /// override if one was advertised, else the default.
    pub fn timeout_for(&self, command: CommandCode) -> u16 {
        self.cmd_timeouts.get(&command).copied().unwrap_or(self.default_timeout)
    }
}

struct Builder {
    version: Option<Version>,
    buffer_size: Option<u16>,
    buffer_count: Option<u8>,
    default_timeout: u16,
    cmd_timeouts: HashMap<CommandCode, u16>,
    inter_transaction_delay: u32,
}

impl Builder {
    fn new() -> Self {
        Builder {
            version: None,
            buffer_size: None,
            buffer_count: None,
            default_timeout: DEFAULT_TIMEOUT_100MS,
            cmd_timeouts: HashMap::new(),
            inter_transaction_delay: 0,
        }
    }

    fn finish(self) -> Result<ClientInfo, ClientInfoDecodeError> {
        let version = self.version.ok_or(ClientInfoDecodeError::MissingField("version"))?;
        let buffer_size =
            self.buffer_size.ok_or(ClientInfoDecodeError::MissingField("buffer_size"))?;
        let buffer_count =
            self.buffer_count.ok_or(ClientInfoDecodeError::MissingField("buffer_count"))?;
        Ok(ClientInfo {
            version,
            buffer_size,
            buffer_count,
            default_timeout: self.default_timeout,
            cmd_timeouts: self.cmd_timeouts,
            inter_transaction_delay: self.inter_transaction_delay,
        })
    }
}

/// Parses the TLV record stream from a `GET_CLIENT_INFO` response payload.
pub fn decode(payload: &[u8]) -> Result<ClientInfo, ClientInfoDecodeError> {
    let mut builder = Builder::new();
    let mut offset = 0usize;

    while offset < payload.len() {
        if offset + 2 > payload.len() {
            return Err(ClientInfoDecodeError::Truncated { offset });
        }
        let ty = payload[offset];
        let len = payload[offset + 1];
        let value_start = offset + 2;
        let value_end = value_start + len as usize;
        if value_end > payload.len() {
            return Err(ClientInfoDecodeError::Truncated { offset });
        }
        let value = &payload[value_start..value_end];

        match ty {
            TYPE_PROTOCOL_VERSION => {
                if len != 3 && len != 4 {
                    return Err(ClientInfoDecodeError::BadFieldLength { ty, len });
                }
                builder.version = Some(Version {
                    major: value[0],
                    minor: value[1],
                    patch: value[2],
                    internal: value.get(3).copied(),
                });
            }
            TYPE_BUFFER_INFO => {
                if len != 3 {
                    return Err(ClientInfoDecodeError::BadFieldLength { ty, len });
                }
                builder.buffer_size = Some(u16::from_le_bytes([value[0], value[1]]));
                builder.buffer_count = Some(value[2]);
            }
            TYPE_COMMAND_TIMEOUT => {
                if len == 0 || len % 3 != 0 {
                    return Err(ClientInfoDecodeError::BadFieldLength { ty, len });
                }
                for (i, triple) in value.chunks_exact(3).enumerate() {
                    let code = triple[0];
                    let timeout = u16::from_le_bytes([triple[1], triple[2]]);
                    if code == 0 {
                        if i != 0 {
                            return Err(ClientInfoDecodeError::DefaultTimeoutNotFirst(code));
                        }
                        builder.default_timeout = timeout;
                        builder.cmd_timeouts.clear();
                    } else {
                        let command = CommandCode::try_from(code)
                            .map_err(|_| ClientInfoDecodeError::BadFieldLength { ty, len })?;
                        builder.cmd_timeouts.insert(command, timeout);
                    }
                }
            }
            TYPE_INTER_TRANSACTION_DELAY => {
                if len != 4 {
                    return Err(ClientInfoDecodeError::BadFieldLength { ty, len });
                }
                builder.inter_transaction_delay =
                    u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            }
            other => return Err(ClientInfoDecodeError::UnknownType(other)),
        }

        offset = value_end;
    }

    builder.finish()
}
