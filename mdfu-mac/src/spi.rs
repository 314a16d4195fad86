use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::{MacConfig, MacError, MacPort};

/// Full-duplex SPI MAC feeding `mdfu-transport`'s polled SPI transport
/// (§4.2). Every `read` is really an `exchange` against dummy bytes
/// clocked out by the host, which is what the polled SPI state machine
/// expects of its MAC.
pub struct SpidevMac {
    dev: Option<Spidev>,
    config: MacConfig,
}

impl SpidevMac {
    pub fn new() -> Self {
        SpidevMac { dev: None, config: MacConfig::default() }
    }
}

impl Default for SpidevMac {
    fn default() -> Self {
        Self::new()
    }
}

impl MacPort for SpidevMac {
    fn init(&mut self, config: &MacConfig) -> Result<(), MacError> {
        self.config = config.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<(), MacError> {
        let mut dev = Spidev::open(&self.config.path)
            .map_err(|e| MacError::Config(e.to_string()))?;
        let mode = match self.config.spi_mode {
            0 => SpiModeFlags::SPI_MODE_0,
            1 => SpiModeFlags::SPI_MODE_1,
            2 => SpiModeFlags::SPI_MODE_2,
            3 => SpiModeFlags::SPI_MODE_3,
            other => {
                return Err(MacError::Config(format!(
                    "invalid SPI mode {other}"
                )))
            }
        };
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(self.config.spi_speed_hz)
            .mode(mode)
            .build();
        dev.configure(&options).map_err(MacError::Io)?;
        self.dev = Some(dev);
        Ok(())
    }

    fn close(&mut self) -> Result<(), MacError> {
        self.dev = None;
        Ok(())
    }

    /// Full-duplex exchange: `buf` is both the dummy bytes clocked out and
    /// the buffer the client's reply is clocked into.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MacError> {
        let dev = self.dev.as_mut().ok_or(MacError::NotOpen)?;
        let tx = buf.to_vec();
        let mut transfer = SpidevTransfer::read_write(&tx, buf);
        dev.transfer(&mut transfer).map_err(MacError::Io)?;
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), MacError> {
        let dev = self.dev.as_mut().ok_or(MacError::NotOpen)?;
        let mut scratch = vec![0u8; buf.len()];
        let mut transfer = SpidevTransfer::read_write(buf, &mut scratch);
        dev.transfer(&mut transfer).map_err(MacError::Io)
    }
}
