use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use crate::{MacConfig, MacError, MacPort};

/// Half-duplex I2C MAC feeding `mdfu-transport`'s polled I2C transport
/// (§4.3). Writes ignore NAKs at this layer per spec — the protocol
/// detects client-not-ready through the response-poll timeout instead.
pub struct I2cdevMac {
    dev: Option<LinuxI2CDevice>,
    config: MacConfig,
}

impl I2cdevMac {
    pub fn new() -> Self {
        I2cdevMac { dev: None, config: MacConfig::default() }
    }
}

impl Default for I2cdevMac {
    fn default() -> Self {
        Self::new()
    }
}

impl MacPort for I2cdevMac {
    fn init(&mut self, config: &MacConfig) -> Result<(), MacError> {
        self.config = config.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<(), MacError> {
        let dev = LinuxI2CDevice::new(&self.config.path, self.config.i2c_address)
            .map_err(|e| MacError::Config(e.to_string()))?;
        self.dev = Some(dev);
        Ok(())
    }

    fn close(&mut self) -> Result<(), MacError> {
        self.dev = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MacError> {
        let dev = self.dev.as_mut().ok_or(MacError::NotOpen)?;
        dev.read(buf)
            .map_err(|e| MacError::Config(e.to_string()))?;
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), MacError> {
        let dev = self.dev.as_mut().ok_or(MacError::NotOpen)?;
        // Per spec: ignore the NAK here, the poll loop above us will time
        // out if the client never answers.
        let _ = dev.write(buf);
        Ok(())
    }
}
