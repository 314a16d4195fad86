//! Byte-granular MAC port: the bottom of the stack per §6 of the MDFU spec.
//!
//! A MAC port moves raw bytes between the host and whatever physical or
//! emulated link a transport has been told to use. It knows nothing about
//! framing, sequencing, or retries — that's the transport's and engine's
//! job. Per spec, these are external collaborators; this crate gives them
//! an interface-shaped home and a couple of thin concrete adapters.

use std::time::Duration;

mod config;
pub use config::MacConfig;

#[cfg(feature = "network")]
mod network;
#[cfg(feature = "network")]
pub use network::NetworkMac;

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialMac;

#[cfg(feature = "spidev")]
mod spi;
#[cfg(feature = "spidev")]
pub use spi::SpidevMac;

#[cfg(feature = "i2cdev")]
mod i2c;
#[cfg(feature = "i2cdev")]
pub use i2c::I2cdevMac;

#[derive(Debug, thiserror::Error)]
pub enum MacError {
    #[error("MAC is not open")]
    NotOpen,
    #[error("MAC I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MAC configuration error: {0}")]
    Config(String),
}

/// Capability set consumed by a transport: `{init, open, close, read, write}`.
pub trait MacPort {
    fn init(&mut self, config: &MacConfig) -> Result<(), MacError>;
    fn open(&mut self) -> Result<(), MacError>;
    fn close(&mut self) -> Result<(), MacError>;

    /// Reads up to `buf.len()` bytes, returning the count actually read.
    /// Implementations are not required to block indefinitely: returning
    /// 0 on a short poll is legal and expected of transports that bound
    /// their own deadlines by calling `read` repeatedly.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MacError>;

    fn write(&mut self, buf: &[u8]) -> Result<(), MacError>;
}

/// Bounds how long a single underlying read may block. Transports layer
/// their own deadline on top by calling `read` in a loop; this just keeps
/// any one call from blocking forever on a link that never answers.
pub(crate) const DEFAULT_MAC_READ_TIMEOUT: Duration = Duration::from_millis(20);
