//! The MDFU protocol engine (§4.4): sequenced request/response over a
//! generic `Transport`, client-capability discovery, and the update
//! workflow the orchestrator drives.

use std::time::Duration;

use mdfu_transport::{IoctlKey, IoctlValue, Transport};

use crate::client_info::{self, ClientInfo};
use crate::error::EngineError;
use crate::image::ImageReader;
use crate::packet::{CommandCode, Packet, StatusCode};
use crate::{MAX_CAUSE, MAX_CMD_DATA, MAX_RSP_DATA};

/// The host's own protocol version, compared against what the client
/// advertises during discovery (Design Notes open question: fixed here
/// at 1.0.0 for lack of a build-time version source in scope).
const HOST_VERSION: (u8, u8, u8) = (1, 0, 0);

/// Timeout used for the synchronizing `GET_CLIENT_INFO` exchange, before
/// any per-command timeout is known (§4.4 send-and-receive algorithm).
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Inter-transaction delay pushed to the transport before client info is
/// known, so SPI/I²C don't hammer a client that hasn't booted yet.
const BOOTSTRAP_ITD_SECONDS: f64 = 0.010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    ClientKnown,
    Transferring,
    Finalizing,
}

/// Owns every piece of session state: the transport, the sequence
/// counter, retry budget, and whatever client info discovery produced.
/// Nothing here is global — a second `MdfuEngine` drives an entirely
/// independent session.
pub struct MdfuEngine<T: Transport> {
    transport: T,
    retries: u8,
    sequence: u8,
    state: SessionState,
    client_info: Option<ClientInfo>,
    client_info_raw: Option<Vec<u8>>,
}

impl<T: Transport> MdfuEngine<T> {
    pub fn init(transport: T, retries: u8) -> Self {
        MdfuEngine {
            transport,
            retries,
            sequence: 0,
            state: SessionState::Closed,
            client_info: None,
            client_info_raw: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    /// The raw TLV payload of the last successful `GET_CLIENT_INFO`
    /// exchange, before it was decoded into a `ClientInfo`. Exists for
    /// `dump --raw`, which prints the wire bytes alongside the decode.
    pub fn client_info_raw(&self) -> Option<&[u8]> {
        self.client_info_raw.as_deref()
    }

    pub fn open(&mut self) -> Result<(), EngineError> {
        self.transport.open()?;
        self.state = SessionState::Open;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), EngineError> {
        self.transport.close()?;
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Sends a single non-sync command and waits for its response,
    /// outside of the `get_client_info`/`run_update` workflows. Used by
    /// CLI actions (e.g. `change-mode`) that need one bespoke exchange
    /// against an already-discovered client.
    pub fn run_raw_command(
        &mut self,
        command: CommandCode,
        payload: &[u8],
    ) -> Result<Packet, EngineError> {
        self.send_and_receive(command, payload, false)
    }

    fn timeout_for(&self, command: CommandCode) -> Duration {
        match &self.client_info {
            Some(info) => Duration::from_millis(info.timeout_for(command) as u64 * 100),
            None => BOOTSTRAP_TIMEOUT,
        }
    }

    /// One command/response exchange, with retry on both write and read
    /// failure (§4.4 send-and-receive algorithm). Packet decode errors
    /// (`InvalidCommand`/`InvalidStatus`) are a protocol breach, not a
    /// transport hiccup, so they propagate immediately instead of
    /// consuming a retry attempt.
    fn send_and_receive(
        &mut self,
        command: CommandCode,
        payload: &[u8],
        sync: bool,
    ) -> Result<Packet, EngineError> {
        if sync {
            self.sequence = 0;
        }
        let sequence = self.sequence;
        let frame =
            Packet::Command { sync, sequence, command, payload: payload.to_vec() }.encode();
        let timeout = self.timeout_for(command);

        let mut attempts = 0u8;
        while attempts < self.retries {
            attempts += 1;
            log::debug!(
                "tx seq={sequence} cmd={command:?} attempt {attempts}/{retries}",
                retries = self.retries
            );
            if let Err(e) = self.transport.write(&frame) {
                log::warn!("write failed for cmd={command:?} seq={sequence}: {e}");
                continue;
            }
            let mut buf = vec![0u8; 2 + MAX_RSP_DATA];
            let n = match self.transport.read(&mut buf, timeout) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("read failed for cmd={command:?} seq={sequence}: {e}");
                    continue;
                }
            };
            let response = match Packet::decode_status(&buf[..n]) {
                Ok(response) => response,
                Err(e) => {
                    log::error!("malformed response to cmd={command:?} seq={sequence}: {e}");
                    return Err(e.into());
                }
            };
            let Packet::Status { resend, status, payload: rsp_payload, .. } = &response else {
                unreachable!("decode_status always returns Packet::Status")
            };
            if *resend {
                log::warn!("client requested resend for cmd={command:?} seq={sequence}");
                continue;
            }
            self.sequence = (self.sequence + 1) % 32;
            if *status != StatusCode::Success {
                let cause_byte = match status {
                    StatusCode::NotExecuted | StatusCode::AbortFileTransfer => {
                        rsp_payload.first().copied()
                    }
                    _ => None,
                };
                match cause_byte {
                    Some(cause) if cause < MAX_CAUSE => {
                        log::error!("cmd={command:?} failed: status={status:?} cause={cause}");
                    }
                    Some(cause) => {
                        log::error!(
                            "cmd={command:?} failed: status={status:?} cause={cause} (out of range)"
                        );
                    }
                    None => {
                        log::error!("cmd={command:?} failed: status={status:?}");
                    }
                }
                return Err(EngineError::ProtocolError { status: *status, cause_byte });
            }
            return Ok(response);
        }
        log::error!(
            "retries exhausted for cmd={command:?} seq={sequence} after {retries} attempts",
            retries = self.retries
        );
        Err(EngineError::RetriesExhausted { retries: self.retries })
    }

    /// Synchronizes with the client and decodes its capability record
    /// (§4.4 steps 1–3). Safe to call on its own for the `client-info`
    /// CLI action, or as the first step of `run_update`.
    pub fn get_client_info(&mut self) -> Result<ClientInfo, EngineError> {
        let _ = self
            .transport
            .ioctl(IoctlKey::InterTransactionDelay, IoctlValue::Seconds(BOOTSTRAP_ITD_SECONDS));

        let response = self.send_and_receive(CommandCode::GetClientInfo, &[], true)?;
        let Packet::Status { payload, .. } = response else {
            unreachable!("decode_status always returns Packet::Status")
        };
        let info = client_info::decode(&payload)?;

        let client_version = (info.version.major, info.version.minor, info.version.patch);
        if client_version > HOST_VERSION {
            return Err(EngineError::VersionMismatch {
                client_major: info.version.major,
                client_minor: info.version.minor,
                client_patch: info.version.patch,
                host_major: HOST_VERSION.0,
                host_minor: HOST_VERSION.1,
                host_patch: HOST_VERSION.2,
            });
        }
        if info.buffer_size as usize > MAX_CMD_DATA {
            return Err(EngineError::BufferTooSmall {
                buffer_size: info.buffer_size,
                max_cmd_data: MAX_CMD_DATA,
            });
        }

        let _ = self.transport.ioctl(
            IoctlKey::InterTransactionDelay,
            IoctlValue::Seconds(info.inter_transaction_delay as f64 / 1_000_000_000.0),
        );

        self.client_info = Some(info.clone());
        self.client_info_raw = Some(payload);
        self.state = SessionState::ClientKnown;
        Ok(info)
    }

    /// Drives the full update workflow (§4.4 steps 1–7): discover, start,
    /// stream the image in `buffer_size`-sized chunks, verify the
    /// resulting image state, and end the transfer. Any fatal error
    /// drops session state back to `Closed`; the orchestrator is still
    /// responsible for actually closing the transport and image reader.
    pub fn run_update(&mut self, image: &mut impl ImageReader) -> Result<(), EngineError> {
        match self.run_update_inner(image) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    fn run_update_inner(&mut self, image: &mut impl ImageReader) -> Result<(), EngineError> {
        let info = self.get_client_info()?;

        self.state = SessionState::Transferring;
        self.send_and_receive(CommandCode::StartTransfer, &[], false)?;

        let chunk_size = info.buffer_size as usize;
        loop {
            let mut chunk = vec![0u8; chunk_size];
            let n = image.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.send_and_receive(CommandCode::WriteChunk, &chunk[..n], false)?;
            if n < chunk_size {
                break;
            }
        }

        self.state = SessionState::Finalizing;
        let response = self.send_and_receive(CommandCode::GetImageState, &[], false)?;
        let Packet::Status { payload, .. } = response else {
            unreachable!("decode_status always returns Packet::Status")
        };
        let got = payload.first().copied();
        if got != Some(1) {
            return Err(EngineError::ImageInvalid { got });
        }

        self.send_and_receive(CommandCode::EndTransfer, &[], false)?;
        self.state = SessionState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdfu_transport::TransportError;
    use std::collections::VecDeque;

    struct FakeTransport {
        scripted: VecDeque<Result<Vec<u8>, TransportError>>,
        sent: Vec<Vec<u8>>,
    }

    impl FakeTransport {
        fn new(scripted: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            FakeTransport { scripted: scripted.into(), sent: Vec::new() }
        }
    }

    impl Transport for FakeTransport {
        fn open(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
            self.sent.push(packet.to_vec());
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
            match self.scripted.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(TransportError::Timeout),
            }
        }
    }

    fn status_bytes(resend: bool, sequence: u8, status: StatusCode, payload: &[u8]) -> Vec<u8> {
        Packet::Status { resend, sequence, status, payload: payload.to_vec() }.encode()
    }

    struct EmptyImage;
    impl ImageReader for EmptyImage {
        fn open(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn resend_does_not_advance_sequence() {
        let responses = vec![
            Ok(status_bytes(true, 7, StatusCode::Success, &[])),
            Ok(status_bytes(false, 7, StatusCode::Success, &[])),
        ];
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 3);
        engine.sequence = 7;
        let result = engine.send_and_receive(CommandCode::WriteChunk, &[0xAB], false);
        assert!(result.is_ok());
        assert_eq!(engine.sequence, 8);
        assert_eq!(engine.transport.sent.len(), 2);
        assert_eq!(engine.transport.sent[0], engine.transport.sent[1]);
    }

    #[test]
    fn non_success_status_advances_sequence_before_failing() {
        let responses =
            vec![Ok(status_bytes(false, 0, StatusCode::NotExecuted, &[0x02]))];
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 3);
        let err = engine.send_and_receive(CommandCode::StartTransfer, &[], false).unwrap_err();
        assert_eq!(engine.sequence, 1);
        assert!(matches!(
            err,
            EngineError::ProtocolError { status: StatusCode::NotExecuted, cause_byte: Some(2) }
        ));
    }

    #[test]
    fn retries_are_capped_and_surfaced_as_exhausted() {
        let responses = (0..3).map(|_| Err(TransportError::Timeout)).collect::<Vec<_>>();
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 3);
        let err = engine.send_and_receive(CommandCode::GetClientInfo, &[], true).unwrap_err();
        assert!(matches!(err, EngineError::RetriesExhausted { retries: 3 }));
        assert_eq!(engine.transport.sent.len(), 3);
    }

    #[test]
    fn sync_resets_sequence_to_zero() {
        let responses = vec![Ok(status_bytes(false, 0, StatusCode::Success, &[]))];
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 1);
        engine.sequence = 19;
        engine.send_and_receive(CommandCode::GetClientInfo, &[], true).unwrap();
        assert_eq!(engine.transport.sent[0][0] & 0x1F, 0);
    }

    #[test]
    fn happy_path_chunked_update() {
        let client_info_payload: Vec<u8> = vec![
            0x02, 0x03, 0x02, 0x00, 0x01, // BUFFER_INFO: size=2, count=1
            0x01, 0x03, 0x01, 0x00, 0x00, // PROTOCOL_VERSION: 1.0.0
        ];
        let responses = vec![
            Ok(status_bytes(false, 0, StatusCode::Success, &client_info_payload)),
            Ok(status_bytes(false, 1, StatusCode::Success, &[])), // START_TRANSFER
            Ok(status_bytes(false, 2, StatusCode::Success, &[])), // WRITE_CHUNK [0,1]
            Ok(status_bytes(false, 3, StatusCode::Success, &[])), // WRITE_CHUNK [2,3]
            Ok(status_bytes(false, 4, StatusCode::Success, &[1])), // GET_IMAGE_STATE
            Ok(status_bytes(false, 5, StatusCode::Success, &[])), // END_TRANSFER
        ];
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 3);
        struct Image(Vec<u8>, usize);
        impl ImageReader for Image {
            fn open(&mut self) -> std::io::Result<()> {
                Ok(())
            }
            fn close(&mut self) -> std::io::Result<()> {
                Ok(())
            }
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let remaining = &self.0[self.1..];
                let n = remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                self.1 += n;
                Ok(n)
            }
        }
        let mut image = Image(vec![0x00, 0x01, 0x02, 0x03], 0);
        engine.run_update(&mut image).unwrap();
        assert_eq!(engine.state(), SessionState::Closed);

        let sent = &engine.transport.sent;
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[0][0], 0x80); // GET_CLIENT_INFO, sync, seq 0
        assert_eq!(sent[1][0], 1); // START_TRANSFER, seq 1
        assert_eq!(&sent[2][2..], &[0x00, 0x01]);
        assert_eq!(&sent[3][2..], &[0x02, 0x03]);
        assert_eq!(sent[4][0], 4); // GET_IMAGE_STATE, seq 4
        assert_eq!(sent[5][0], 5); // END_TRANSFER, seq 5
    }

    #[test]
    fn image_state_other_than_valid_fails_the_update() {
        let client_info_payload: Vec<u8> =
            vec![0x02, 0x03, 0x02, 0x00, 0x01, 0x01, 0x03, 0x01, 0x00, 0x00];
        let responses = vec![
            Ok(status_bytes(false, 0, StatusCode::Success, &client_info_payload)),
            Ok(status_bytes(false, 1, StatusCode::Success, &[])),
            Ok(status_bytes(false, 2, StatusCode::Success, &[0])),
        ];
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 3);
        let err = engine.run_update(&mut EmptyImage).unwrap_err();
        assert!(matches!(err, EngineError::ImageInvalid { got: Some(0) }));
        assert_eq!(engine.state(), SessionState::Closed);
    }

    #[test]
    fn oversize_buffer_is_rejected_before_transfer_begins() {
        let oversize = (MAX_CMD_DATA + 1) as u16;
        let mut payload = vec![0x02, 0x03];
        payload.extend_from_slice(&oversize.to_le_bytes());
        payload.push(0x01);
        payload.extend_from_slice(&[0x01, 0x03, 0x01, 0x00, 0x00]);
        let responses =
            vec![Ok(status_bytes(false, 0, StatusCode::Success, &payload))];
        let mut engine = MdfuEngine::init(FakeTransport::new(responses), 3);
        let err = engine.get_client_info().unwrap_err();
        assert!(matches!(err, EngineError::BufferTooSmall { .. }));
    }
}
