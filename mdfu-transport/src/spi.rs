//! Polled SPI transport (§4.2): the client clocks out responses on its
//! own schedule behind a length frame and a response frame, separated by
//! an inter-transaction delay the client advertises via client info.

use std::thread;
use std::time::{Duration, Instant};

use mdfu_mac::MacPort;

use crate::framing::crc16;
use crate::{IoctlKey, IoctlValue, Transport, TransportError};

const CMD_PREFIX: u8 = 0x11;
const POLL_PREFIX: u8 = 0x55;
const LEN_MARKER: &[u8; 3] = b"LEN";
const RSP_MARKER: &[u8; 3] = b"RSP";

pub struct SpiTransport<M> {
    mac: M,
    itd_delay: Duration,
    itd_deadline: Instant,
}

impl<M: MacPort> SpiTransport<M> {
    pub fn new(mac: M) -> Self {
        SpiTransport { mac, itd_delay: Duration::ZERO, itd_deadline: Instant::now() }
    }

    fn wait_itd(&self) {
        let now = Instant::now();
        if now < self.itd_deadline {
            thread::sleep(self.itd_deadline - now);
        }
    }

    fn reset_itd_timer(&mut self) {
        self.itd_deadline = Instant::now() + self.itd_delay;
    }

    fn poll_length(&mut self, deadline: Instant) -> Result<u16, TransportError> {
        loop {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            self.wait_itd();
            let mut frame = [0u8; 1 + 3 + 2 + 2];
            frame[0] = POLL_PREFIX;
            self.mac.read(&mut frame)?;
            self.reset_itd_timer();

            if &frame[1..4] != LEN_MARKER {
                continue; // busy frame, poll again
            }
            let len = u16::from_le_bytes([frame[4], frame[5]]);
            let received = u16::from_le_bytes([frame[6], frame[7]]);
            let computed = crc16(&frame[4..6]);
            if computed != received {
                return Err(TransportError::ChecksumMismatch { computed, received });
            }
            if len < 2 {
                return Err(TransportError::ShortResponse);
            }
            return Ok(len);
        }
    }

    fn poll_response(
        &mut self,
        length: u16,
        deadline: Instant,
    ) -> Result<Vec<u8>, TransportError> {
        let length = length as usize;
        loop {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            self.wait_itd();
            let mut frame = vec![0u8; 1 + 3 + length];
            frame[0] = POLL_PREFIX;
            self.mac.read(&mut frame)?;
            self.reset_itd_timer();

            if &frame[1..4] != RSP_MARKER {
                continue; // busy frame, poll again
            }
            let body = &frame[4..4 + length];
            let response_len = length - 2;
            let (response, crc_bytes) = body.split_at(response_len);
            let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
            let computed = crc16(response);
            if computed != received {
                return Err(TransportError::ChecksumMismatch { computed, received });
            }
            return Ok(response.to_vec());
        }
    }
}

impl<M: MacPort> Transport for SpiTransport<M> {
    fn open(&mut self) -> Result<(), TransportError> {
        self.mac.open().map_err(Into::into)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.mac.close().map_err(Into::into)
    }

    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.wait_itd();
        let mut frame = Vec::with_capacity(1 + packet.len() + 2);
        frame.push(CMD_PREFIX);
        frame.extend_from_slice(packet);
        let crc = crc16(packet);
        frame.extend_from_slice(&crc.to_le_bytes());
        self.mac.write(&frame)?;
        self.reset_itd_timer();
        Ok(())
    }

    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let length = self.poll_length(deadline)?;
        let response = self.poll_response(length, deadline)?;
        if response.len() > buf.len() {
            return Err(TransportError::OversizeResponse);
        }
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }

    fn ioctl(
        &mut self,
        key: IoctlKey,
        value: IoctlValue,
    ) -> Result<(), TransportError> {
        match (key, value) {
            (IoctlKey::InterTransactionDelay, IoctlValue::Seconds(secs)) => {
                self.itd_delay = Duration::from_secs_f64(secs.max(0.0));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A fake full-duplex SPI MAC: `read` pops a pre-scripted response
    /// frame the way a real `SpidevMac::read` exchange would, ignoring
    /// whatever poll bytes were already sitting in `buf`.
    struct ScriptedSpiMac {
        responses: VecDeque<Vec<u8>>,
        exchange_times: Vec<Instant>,
    }

    impl ScriptedSpiMac {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            ScriptedSpiMac { responses: responses.into(), exchange_times: Vec::new() }
        }
    }

    impl MacPort for ScriptedSpiMac {
        fn init(&mut self, _c: &mdfu_mac::MacConfig) -> Result<(), mdfu_mac::MacError> {
            Ok(())
        }
        fn open(&mut self) -> Result<(), mdfu_mac::MacError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), mdfu_mac::MacError> {
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, mdfu_mac::MacError> {
            self.exchange_times.push(Instant::now());
            if let Some(frame) = self.responses.pop_front() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
            }
            Ok(buf.len())
        }
        fn write(&mut self, _buf: &[u8]) -> Result<(), mdfu_mac::MacError> {
            Ok(())
        }
    }

    fn len_frame(len: u16) -> Vec<u8> {
        let mut frame = vec![0x55];
        frame.extend_from_slice(LEN_MARKER);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc16(&len.to_le_bytes()).to_le_bytes());
        frame
    }

    fn rsp_frame(response: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x55];
        frame.extend_from_slice(RSP_MARKER);
        frame.extend_from_slice(response);
        frame.extend_from_slice(&crc16(response).to_le_bytes());
        frame
    }

    #[test]
    fn length_two_is_the_smallest_legal_poll() {
        let mac = ScriptedSpiMac::new(vec![len_frame(2)]);
        let mut t = SpiTransport::new(mac);
        let len = t.poll_length(Instant::now() + Duration::from_secs(1)).unwrap();
        assert_eq!(len, 2);
    }

    #[test]
    fn length_one_is_rejected() {
        let mac = ScriptedSpiMac::new(vec![len_frame(1)]);
        let mut t = SpiTransport::new(mac);
        let err = t
            .poll_length(Instant::now() + Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::ShortResponse));
    }

    #[test]
    fn busy_frames_are_polled_past_respecting_itd() {
        let busy = vec![0x55, 0, 0, 0, 0, 0, 0, 0];
        let mac = ScriptedSpiMac::new(vec![
            busy.clone(),
            busy.clone(),
            busy,
            len_frame(2),
        ]);
        let mut t = SpiTransport::new(mac);
        t.ioctl(IoctlKey::InterTransactionDelay, IoctlValue::Seconds(0.01))
            .unwrap();
        let len = t.poll_length(Instant::now() + Duration::from_secs(5)).unwrap();
        assert_eq!(len, 2);
        let times = &t.mac.exchange_times;
        assert_eq!(times.len(), 4);
        let elapsed = times[3] - times[0];
        assert!(elapsed >= Duration::from_millis(30));
    }

    #[test]
    fn full_read_returns_response_payload() {
        let mac = ScriptedSpiMac::new(vec![len_frame(4), rsp_frame(&[0xAB, 0xCD])]);
        let mut t = SpiTransport::new(mac);
        let mut buf = [0u8; 16];
        let n = t.read(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf[..n], &[0xAB, 0xCD]);
    }
}
