//! The framing/transport layer: §4.1 (framed serial), §4.2 (polled SPI),
//! §4.3 (polled I2C), and the `Transport` trait all three implement for
//! the engine in `mdfu-proto` to be generic over.

use std::time::Duration;

pub mod framing;
pub mod i2c;
pub mod spi;

pub use framing::{BufferedFramingTransport, FramingTransport};
pub use i2c::I2cTransport;
pub use spi::SpiTransport;

use mdfu_mac::MacError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport timed out waiting for a frame")]
    Timeout,
    #[error("receive buffer overflowed before a frame terminator was seen")]
    BufferOverflow,
    #[error("invalid escape sequence: 0x{byte:02x} is not an escapable byte")]
    FramingError { byte: u8 },
    #[error("checksum mismatch: computed 0x{computed:04x}, wire said 0x{received:04x}")]
    ChecksumMismatch { computed: u16, received: u16 },
    #[error("frame too short: {len} bytes (need at least 3)")]
    FrameTooShort { len: usize },
    #[error("response payload larger than the poll announced")]
    OversizeResponse,
    #[error("response payload shorter than required")]
    ShortResponse,
    #[error(transparent)]
    Mac(#[from] MacError),
}

/// Recognized `ioctl` keys for `Transport::ioctl` (§6). Transports that
/// don't support a control surface return `Ok(())` from every call —
/// a "null control", per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlKey {
    /// Minimum interval, in seconds, the client needs between bus
    /// transactions (§5 ITD discipline). Argument: `IoctlValue::Seconds`.
    InterTransactionDelay,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IoctlValue {
    Seconds(f64),
}

/// The port the engine drives: frame a packet onto the wire, deliver
/// whole packets back, and accept out-of-band control (§6).
///
/// `read` returns the number of bytes placed into `buf` rather than
/// writing through an out-parameter pair, per the Design Notes'
/// "out-parameter pairs" redesign item.
pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError>;
    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
    fn ioctl(
        &mut self,
        key: IoctlKey,
        value: IoctlValue,
    ) -> Result<(), TransportError> {
        let _ = (key, value);
        Ok(())
    }
}

/// Lets the CLI pick a transport implementation at runtime (one per
/// `--tool` choice) while the engine stays generic over `Transport`.
impl Transport for Box<dyn Transport> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }
    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).write(packet)
    }
    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).read(buf, timeout)
    }
    fn ioctl(
        &mut self,
        key: IoctlKey,
        value: IoctlValue,
    ) -> Result<(), TransportError> {
        (**self).ioctl(key, value)
    }
}
