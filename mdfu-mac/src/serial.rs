use std::io::{Read, Write};

use crate::{MacConfig, MacError, MacPort, DEFAULT_MAC_READ_TIMEOUT};

/// Asynchronous serial MAC, backed by `serialport`. Feeds the framed
/// serial transport (§4.1).
pub struct SerialMac {
    port: Option<Box<dyn serialport::SerialPort>>,
    config: MacConfig,
}

impl SerialMac {
    pub fn new() -> Self {
        SerialMac { port: None, config: MacConfig::default() }
    }
}

impl Default for SerialMac {
    fn default() -> Self {
        Self::new()
    }
}

impl MacPort for SerialMac {
    fn init(&mut self, config: &MacConfig) -> Result<(), MacError> {
        self.config = config.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<(), MacError> {
        let port = serialport::new(&self.config.path, self.config.baud)
            .timeout(DEFAULT_MAC_READ_TIMEOUT)
            .open()
            .map_err(|e| MacError::Config(e.to_string()))?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), MacError> {
        self.port = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MacError> {
        let port = self.port.as_mut().ok_or(MacError::NotOpen)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            // A timed-out read with nothing available is a legal "0 bytes
            // this time", not an error the transport needs to see.
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(MacError::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), MacError> {
        let port = self.port.as_mut().ok_or(MacError::NotOpen)?;
        port.write_all(buf).map_err(MacError::Io)
    }
}
