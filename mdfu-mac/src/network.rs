use std::io::{Read, Write};
use std::net::TcpStream;

use crate::{MacConfig, MacError, MacPort, DEFAULT_MAC_READ_TIMEOUT};

/// Network-tunneled MAC: carries the same framed-serial byte stream (§4.1)
/// over a TCP socket, the "network-tunneled equivalent" transport spec.md
/// describes in §1.
pub struct NetworkMac {
    stream: Option<TcpStream>,
    config: MacConfig,
}

impl NetworkMac {
    pub fn new() -> Self {
        NetworkMac { stream: None, config: MacConfig::default() }
    }
}

impl Default for NetworkMac {
    fn default() -> Self {
        Self::new()
    }
}

impl MacPort for NetworkMac {
    fn init(&mut self, config: &MacConfig) -> Result<(), MacError> {
        self.config = config.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<(), MacError> {
        let addr = format!("{}:{}", self.config.path, self.config.tcp_port);
        let stream = TcpStream::connect(&addr)
            .map_err(|e| MacError::Config(format!("connect {addr}: {e}")))?;
        stream.set_read_timeout(Some(DEFAULT_MAC_READ_TIMEOUT))?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<(), MacError> {
        self.stream = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MacError> {
        let stream = self.stream.as_mut().ok_or(MacError::NotOpen)?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(MacError::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), MacError> {
        let stream = self.stream.as_mut().ok_or(MacError::NotOpen)?;
        stream.write_all(buf).map_err(MacError::Io)
    }
}

