//! The update orchestrator (§4.5): thin glue that picks a tool, builds
//! the transport stack, and sequences a session against an image source
//! or a plain info query. Its only real job is resource ordering: close
//! the MDFU session before the image source, on every path.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;

use mdfu_mac::{MacConfig, MacPort};
use mdfu_proto::{ClientInfo, EngineError, ImageReader, MdfuEngine};
use mdfu_transport::{BufferedFramingTransport, FramingTransport, I2cTransport, SpiTransport, Transport};

use crate::image::FileImageReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Tool {
    Serial,
    Network,
    Spidev,
    I2cdev,
}

/// Number of send-and-receive attempts per command before the engine
/// gives up (§4.4's `R`).
const DEFAULT_RETRIES: u8 = 5;

fn build_transport(tool: Tool, config: &MacConfig) -> Result<Box<dyn Transport>> {
    match tool {
        Tool::Serial => {
            #[cfg(feature = "serial")]
            {
                let mut mac = mdfu_mac::SerialMac::new();
                mac.init(config).context("configuring serial MAC")?;
                Ok(Box::new(FramingTransport::new(mac)))
            }
            #[cfg(not(feature = "serial"))]
            {
                let _ = config;
                bail!("this build was compiled without serial support")
            }
        }
        Tool::Network => {
            #[cfg(feature = "network")]
            {
                let mut mac = mdfu_mac::NetworkMac::new();
                mac.init(config).context("configuring network MAC")?;
                Ok(Box::new(BufferedFramingTransport::new(mac, mdfu_proto::MAX_CMD_DATA)))
            }
            #[cfg(not(feature = "network"))]
            {
                let _ = config;
                bail!("this build was compiled without network support")
            }
        }
        Tool::Spidev => {
            #[cfg(feature = "spidev")]
            {
                let mut mac = mdfu_mac::SpidevMac::new();
                mac.init(config).context("configuring spidev MAC")?;
                Ok(Box::new(SpiTransport::new(mac)))
            }
            #[cfg(not(feature = "spidev"))]
            {
                let _ = config;
                bail!("this build was compiled without spidev support")
            }
        }
        Tool::I2cdev => {
            #[cfg(feature = "i2cdev")]
            {
                let mut mac = mdfu_mac::I2cdevMac::new();
                mac.init(config).context("configuring i2cdev MAC")?;
                Ok(Box::new(I2cTransport::new(mac)))
            }
            #[cfg(not(feature = "i2cdev"))]
            {
                let _ = config;
                bail!("this build was compiled without i2cdev support")
            }
        }
    }
}

pub struct Session {
    engine: MdfuEngine<Box<dyn Transport>>,
}

impl Session {
    pub fn open(tool: Tool, config: &MacConfig) -> Result<Self> {
        let transport = build_transport(tool, config).context("constructing transport")?;
        let mut engine = MdfuEngine::init(transport, DEFAULT_RETRIES);
        engine.open().context("opening transport")?;
        Ok(Session { engine })
    }

    pub fn client_info(&mut self) -> Result<ClientInfo> {
        let info = self.engine.get_client_info();
        let info = self.finish(info);
        let close_result = self.engine.close();
        let info = info?;
        close_result.context("closing MDFU session")?;
        Ok(info)
    }

    /// The raw TLV payload behind the last `client_info()` call, for
    /// `dump --raw`. Only meaningful after `client_info()` has succeeded.
    pub fn client_info_raw(&self) -> Option<&[u8]> {
        self.engine.client_info_raw()
    }

    pub fn run_update(&mut self, image_path: &std::path::Path) -> Result<()> {
        let mut image = FileImageReader::new(image_path);
        image.open().context("opening image file")?;

        let result = self.engine.run_update(&mut image);

        // Close the MDFU session before the image source, in that order,
        // on both the success and the failure path.
        let close_result = self.engine.close();
        let image_close_result = image.close();

        let result = self.finish(result);
        close_result.context("closing MDFU session")?;
        image_close_result.context("closing image file")?;
        result
    }

    /// Discovers the client, sends a bootloader-mode-toggle write, and
    /// closes the session on every path. The toggle payload (`[0xFF]`) is
    /// a tool-internal convention, not a wire format any real client
    /// firmware is known to honor; see `DESIGN.md`.
    pub fn change_mode(&mut self) -> Result<()> {
        let discover_result = self.engine.get_client_info();
        let result = match self.finish(discover_result) {
            Ok(_) => {
                let toggle =
                    self.engine.run_raw_command(mdfu_proto::CommandCode::WriteChunk, &[0xFF]);
                self.finish(toggle).map(|_| ())
            }
            Err(e) => Err(e),
        };
        let close_result = self.engine.close();
        close_result.context("closing MDFU session")?;
        result
    }

    fn finish<T>(&mut self, result: Result<T, EngineError>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                log::debug!("engine error detail: {err:?}");
                Err(err).context("MDFU session failed")
            }
        }
    }
}
