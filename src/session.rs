//! An established WebSocket connection in either role.
//!
//! A [`Session`] owns the transport, the byte-exact reader and a bounded
//! scratch buffer. It is single-connection and single-task: every operation
//! takes `&mut self` and there is no internal locking. The only difference
//! between the roles at this layer is masking direction and which validation
//! rules apply to inbound frames.

use std::fmt;
use std::time::Duration;

use log::{debug, error};

use crate::close::{self, CloseCode};
use crate::config::Timeouts;
use crate::frame::{self, HeaderRead, OpCode, PayloadRead};
use crate::mask::apply_mask;
use crate::reader::{FrameReader, ReadOutcome};
use crate::transport::Transport;
use crate::{Result, WsError};

/// Scratch buffer size for chunked masked sends and overflow drains.
const SCRATCH_LEN: usize = 1500;

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting end. Masks every outgoing frame.
    Client,
    /// The accepting end. Never masks outgoing frames.
    Server,
}

impl Role {
    pub(crate) fn mask_outgoing(self) -> bool {
        matches!(self, Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// What [`Session::recv`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A data frame; its payload occupies the first `len` bytes of the
    /// caller's buffer.
    Frame {
        /// [`OpCode::Text`] or [`OpCode::Binary`].
        opcode: OpCode,
        /// Payload length in bytes.
        len: usize,
    },
    /// The connection ended in an orderly way, either by a peer CLOSE frame
    /// (already answered) or by transport EOF.
    Closed,
}

/// An established WebSocket connection.
pub struct Session<T: Transport> {
    io: T,
    role: Role,
    reader: FrameReader,
    scratch: Vec<u8>,
    open: bool,
    close_deadline: Duration,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(io: T, role: Role, reader: FrameReader, timeouts: Timeouts) -> Self {
        Session {
            io,
            role,
            reader,
            scratch: vec![0; SCRATCH_LEN],
            open: true,
            close_deadline: timeouts.close_deadline,
        }
    }

    /// This session's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the connection is still open for sends and receives.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, payload: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Text, payload).await
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, payload: &[u8]) -> Result<()> {
        self.send_frame(OpCode::Binary, payload).await
    }

    /// Send a ping. The payload must fit a control frame (125 bytes).
    pub async fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > 125 {
            return Err(WsError::ControlFrameTooLarge);
        }
        self.send_frame(OpCode::Ping, payload).await
    }

    /// Send an unsolicited pong heartbeat.
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > 125 {
            return Err(WsError::ControlFrameTooLarge);
        }
        self.send_frame(OpCode::Pong, payload).await
    }

    async fn send_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if !self.open {
            return Err(WsError::ConnectionClosed);
        }
        frame::write_frame(
            &mut self.io,
            opcode,
            payload,
            self.role.mask_outgoing(),
            &mut self.scratch,
        )
        .await
    }

    /// Receive the next data frame into `buf`.
    ///
    /// Control frames are handled inline and never surface: pings are
    /// answered with matching pongs, pongs are discarded, and a peer CLOSE is
    /// answered (mirroring its code) and reported as [`Received::Closed`].
    ///
    /// The session stays usable after [`WsError::Timeout`] (no frame arrived
    /// in time) and after [`WsError::PayloadTooLarge`] (the oversized payload
    /// was drained, the stream is still frame-aligned). Protocol violations
    /// send CLOSE 1002, shut the transport down and surface the error.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<Received> {
        loop {
            if !self.open {
                return Err(WsError::ConnectionClosed);
            }

            let hdr = match frame::read_header(&mut self.reader, &mut self.io).await {
                Ok(HeaderRead::Frame(hdr)) => hdr,
                Ok(HeaderRead::Closed) => {
                    debug!("{} transport closed by peer", self.role);
                    self.open = false;
                    return Ok(Received::Closed);
                }
                Err(WsError::Timeout) => return Err(WsError::Timeout),
                Err(err @ WsError::InvalidOpCode(_)) => return self.fail_protocol(err).await,
                Err(err) => {
                    self.open = false;
                    return Err(err);
                }
            };

            if let Err(err) = hdr.validate(self.role) {
                return self.fail_protocol(err).await;
            }

            if hdr.opcode.is_control() {
                // Validation capped control payloads at 125 bytes, so a
                // small caller buffer can never turn a ping into an
                // overflow.
                let mut control = [0u8; 125];
                let len = hdr.payload_len as usize;
                match self.reader.read_exact(&mut self.io, &mut control[..len]).await {
                    Ok(ReadOutcome::Filled) => {}
                    Ok(ReadOutcome::Closed) => {
                        self.open = false;
                        return Ok(Received::Closed);
                    }
                    Err(err) => {
                        self.open = false;
                        return Err(err);
                    }
                }
                if hdr.masked {
                    apply_mask(&mut control[..len], hdr.mask_key);
                }

                match hdr.opcode {
                    OpCode::Ping => {
                        debug!("answering ping ({len} bytes)");
                        self.send_frame(OpCode::Pong, &control[..len]).await?;
                        continue;
                    }
                    OpCode::Pong => continue,
                    _ => return self.on_close(&control[..len]).await,
                }
            }

            match frame::read_payload(&mut self.reader, &mut self.io, &hdr, buf, &mut self.scratch)
                .await
            {
                Ok(PayloadRead::Complete(len)) => {
                    return Ok(Received::Frame {
                        opcode: hdr.opcode,
                        len,
                    })
                }
                Ok(PayloadRead::Closed) => {
                    self.open = false;
                    return Ok(Received::Closed);
                }
                // The stream was drained past the oversized payload; the
                // session stays usable.
                Err(err @ WsError::PayloadTooLarge { .. }) => return Err(err),
                // Anything else mid-payload leaves the stream misaligned.
                Err(err) => {
                    self.open = false;
                    return Err(err);
                }
            }
        }
    }

    /// Initiate (or complete) the close handshake, then release the
    /// transport. Idempotent: later calls do nothing.
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        debug!("{} closing connection", self.role);

        let payload = close::encode_close(CloseCode::NORMAL);
        let sent = frame::write_frame(
            &mut self.io,
            OpCode::Close,
            &payload,
            self.role.mask_outgoing(),
            &mut self.scratch,
        )
        .await;

        if sent.is_ok() {
            let deadline = self.close_deadline;
            let _ = tokio::time::timeout(deadline, self.drain_until_peer_close()).await;
        }
        let _ = self.io.shutdown().await;
        sent
    }

    /// After sending our CLOSE, consume frames until the peer's CLOSE (or
    /// EOF) so the peer sees a clean handshake. Pings are still answered.
    /// The caller bounds this with the close deadline.
    async fn drain_until_peer_close(&mut self) {
        loop {
            let hdr = match frame::read_header(&mut self.reader, &mut self.io).await {
                Ok(HeaderRead::Frame(hdr)) => hdr,
                Ok(HeaderRead::Closed) => return,
                Err(WsError::Timeout) => continue,
                Err(_) => return,
            };
            if hdr.validate(self.role).is_err() {
                return;
            }

            if hdr.opcode.is_control() {
                let mut control = [0u8; 125];
                let len = hdr.payload_len as usize;
                match self.reader.read_exact(&mut self.io, &mut control[..len]).await {
                    Ok(ReadOutcome::Filled) => {}
                    _ => return,
                }
                if hdr.masked {
                    apply_mask(&mut control[..len], hdr.mask_key);
                }
                match hdr.opcode {
                    OpCode::Close => {
                        let (code, _) = close::decode_close(&control[..len]);
                        debug!(
                            "peer acknowledged close (code {})",
                            code.unwrap_or(CloseCode::NORMAL)
                        );
                        return;
                    }
                    OpCode::Ping => {
                        let mask = self.role.mask_outgoing();
                        let _ = frame::write_frame(
                            &mut self.io,
                            OpCode::Pong,
                            &control[..len],
                            mask,
                            &mut self.scratch,
                        )
                        .await;
                    }
                    _ => {}
                }
            } else if frame::drain_payload(
                &mut self.reader,
                &mut self.io,
                hdr.payload_len,
                &mut self.scratch,
            )
            .await
            .is_err()
            {
                return;
            }
        }
    }

    /// The peer initiated the close handshake: log its code, answer with a
    /// mirrored CLOSE, and shut down.
    async fn on_close(&mut self, payload: &[u8]) -> Result<Received> {
        let (code, reason) = close::decode_close(payload);
        match (&code, &reason) {
            (Some(code), Some(reason)) => {
                debug!("peer sent close (code {code}, reason {reason:?})")
            }
            (Some(code), None) => debug!("peer sent close (code {code})"),
            _ => debug!("peer sent close (no code)"),
        }

        let reply = close::encode_close(code.unwrap_or(CloseCode::NORMAL));
        let mask = self.role.mask_outgoing();
        let _ = frame::write_frame(&mut self.io, OpCode::Close, &reply, mask, &mut self.scratch)
            .await;
        let _ = self.io.shutdown().await;
        self.open = false;
        Ok(Received::Closed)
    }

    /// The peer violated the protocol: notify it with CLOSE 1002, shut down
    /// and surface the violation.
    async fn fail_protocol(&mut self, err: WsError) -> Result<Received> {
        error!("{} protocol violation: {err}", self.role);
        let payload = close::encode_close(CloseCode::PROTOCOL_ERROR);
        let mask = self.role.mask_outgoing();
        let _ = frame::write_frame(&mut self.io, OpCode::Close, &payload, mask, &mut self.scratch)
            .await;
        let _ = self.io.shutdown().await;
        self.open = false;
        Err(err)
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;

    fn session(io: MockTransport, role: Role) -> Session<MockTransport> {
        Session::new(
            io,
            role,
            FrameReader::new(Duration::from_secs(5)),
            Timeouts::default(),
        )
    }

    /// Decode the frames a session wrote to its transport, unmasking where
    /// needed.
    fn parse_sent(mut bytes: &[u8]) -> Vec<(OpCode, Vec<u8>)> {
        let mut frames = Vec::new();
        while !bytes.is_empty() {
            let opcode = OpCode::try_from(bytes[0] & 0x0F).unwrap();
            let masked = bytes[1] & 0x80 != 0;
            let mut len = (bytes[1] & 0x7F) as usize;
            let mut at = 2;
            if len == 126 {
                len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
                at = 4;
            } else if len == 127 {
                len = u64::from_be_bytes(bytes[2..10].try_into().unwrap()) as usize;
                at = 10;
            }
            let key = masked.then(|| {
                let k: [u8; 4] = bytes[at..at + 4].try_into().unwrap();
                at += 4;
                k
            });
            let mut payload = bytes[at..at + len].to_vec();
            if let Some(key) = key {
                apply_mask(&mut payload, key);
            }
            bytes = &bytes[at + len..];
            frames.push((opcode, payload));
        }
        frames
    }

    fn masked_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut frame = vec![0x80 | u8::from(opcode), 0x80 | payload.len() as u8];
        frame.extend_from_slice(&key);
        let mut body = payload.to_vec();
        apply_mask(&mut body, key);
        frame.extend_from_slice(&body);
        frame
    }

    #[tokio::test]
    async fn client_receives_unmasked_text_frame() {
        let io = MockTransport::new().data(&[0x81, 0x04, b'p', b'i', b'n', b'g']);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 64];
        let got = ws.recv(&mut buf).await.unwrap();
        assert_eq!(
            got,
            Received::Frame {
                opcode: OpCode::Text,
                len: 4
            }
        );
        assert_eq!(&buf[..4], b"ping");
        assert!(ws.is_open());
    }

    #[tokio::test]
    async fn ping_is_answered_and_never_surfaces() {
        let io = MockTransport::new()
            .data(&[0x89, 0x03, b'a', b'b', b'c'])
            .data(&[0x82, 0x01, 0x7F]);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        let got = ws.recv(&mut buf).await.unwrap();
        assert_eq!(
            got,
            Received::Frame {
                opcode: OpCode::Binary,
                len: 1
            }
        );

        let frames = parse_sent(&ws.transport().sent);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, OpCode::Pong);
        assert_eq!(frames[0].1, b"abc");
    }

    #[tokio::test]
    async fn pong_is_discarded() {
        let io = MockTransport::new()
            .data(&[0x8A, 0x00])
            .data(&[0x81, 0x02, b'o', b'k']);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        let got = ws.recv(&mut buf).await.unwrap();
        assert_eq!(
            got,
            Received::Frame {
                opcode: OpCode::Text,
                len: 2
            }
        );
        assert!(ws.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn peer_close_is_mirrored_and_reported() {
        // Close with code 1001.
        let io = MockTransport::new().data(&[0x88, 0x02, 0x03, 0xE9]);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        assert_eq!(ws.recv(&mut buf).await.unwrap(), Received::Closed);
        assert!(!ws.is_open());

        let frames = parse_sent(&ws.transport().sent);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, OpCode::Close);
        assert_eq!(frames[0].1, vec![0x03, 0xE9]);
        assert!(ws.transport().shutdown_called);

        // A closed session refuses further receives.
        assert!(matches!(
            ws.recv(&mut buf).await,
            Err(WsError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn transport_eof_reports_closed() {
        let io = MockTransport::new().closed();
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        assert_eq!(ws.recv(&mut buf).await.unwrap(), Received::Closed);
        assert!(!ws.is_open());
    }

    #[tokio::test]
    async fn reserved_bits_fail_the_connection() {
        let io = MockTransport::new().data(&[0xC1, 0x00]);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        assert!(matches!(
            ws.recv(&mut buf).await,
            Err(WsError::ReservedBitsNotZero)
        ));
        assert!(!ws.is_open());

        // The peer was told why before the shutdown.
        let frames = parse_sent(&ws.transport().sent);
        assert_eq!(frames[0].0, OpCode::Close);
        assert_eq!(frames[0].1, vec![0x03, 0xEA]);
        assert!(ws.transport().shutdown_called);
    }

    #[tokio::test]
    async fn unknown_opcode_fails_the_connection() {
        let io = MockTransport::new().data(&[0x83, 0x00]);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        assert!(matches!(
            ws.recv(&mut buf).await,
            Err(WsError::InvalidOpCode(0x3))
        ));
        assert!(!ws.is_open());
    }

    #[tokio::test]
    async fn overflow_drains_and_keeps_the_session_usable() {
        let big = vec![0x55u8; 200];
        let io = MockTransport::new()
            .data(&[0x82, 126, 0, 200])
            .data(&big)
            .data(&[0x81, 0x02, b'o', b'k']);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 32];
        assert!(matches!(
            ws.recv(&mut buf).await,
            Err(WsError::PayloadTooLarge {
                len: 200,
                capacity: 32
            })
        ));
        assert!(ws.is_open());

        let got = ws.recv(&mut buf).await.unwrap();
        assert_eq!(
            got,
            Received::Frame {
                opcode: OpCode::Text,
                len: 2
            }
        );
        assert_eq!(&buf[..2], b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out_but_stays_open() {
        let mut io = MockTransport::new();
        for _ in 0..32 {
            io = io.no_data();
        }
        let mut ws = Session::new(
            io,
            Role::Client,
            FrameReader::new(Duration::from_millis(50)),
            Timeouts::default(),
        );

        let mut buf = [0u8; 16];
        assert!(matches!(ws.recv(&mut buf).await, Err(WsError::Timeout)));
        assert!(ws.is_open());
    }

    #[tokio::test]
    async fn server_rejects_unmasked_frames() {
        let io = MockTransport::new().data(&[0x81, 0x02, b'h', b'i']);
        let mut ws = session(io, Role::Server);

        let mut buf = [0u8; 16];
        assert!(matches!(
            ws.recv(&mut buf).await,
            Err(WsError::MissingFrameMask)
        ));
        assert!(!ws.is_open());

        // Server close frames go out unmasked.
        let frames = parse_sent(&ws.transport().sent);
        assert_eq!(frames[0], (OpCode::Close, vec![0x03, 0xEA]));
        assert_eq!(ws.transport().sent[1] & 0x80, 0);
    }

    #[tokio::test]
    async fn server_unmasks_inbound_frames() {
        let io = MockTransport::new().data(&masked_frame(OpCode::Text, b"hello"));
        let mut ws = session(io, Role::Server);

        let mut buf = [0u8; 16];
        let got = ws.recv(&mut buf).await.unwrap();
        assert_eq!(
            got,
            Received::Frame {
                opcode: OpCode::Text,
                len: 5
            }
        );
        assert_eq!(&buf[..5], b"hello");
    }

    #[tokio::test]
    async fn client_frames_are_masked_and_server_frames_are_not() {
        let io = MockTransport::new();
        let mut ws = session(io, Role::Client);
        ws.send_text(b"data").await.unwrap();
        assert_ne!(ws.transport().sent[1] & 0x80, 0);
        let frames = parse_sent(&ws.transport().sent);
        assert_eq!(frames[0], (OpCode::Text, b"data".to_vec()));

        let io = MockTransport::new();
        let mut ws = session(io, Role::Server);
        ws.send_text(b"data").await.unwrap();
        assert_eq!(ws.transport().sent[1] & 0x80, 0);
        assert_eq!(&ws.transport().sent[2..], b"data");
    }

    #[tokio::test]
    async fn oversized_control_sends_are_refused_locally() {
        let io = MockTransport::new();
        let mut ws = session(io, Role::Client);
        let big = [0u8; 126];
        assert!(matches!(
            ws.send_ping(&big).await,
            Err(WsError::ControlFrameTooLarge)
        ));
        assert!(ws.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn close_sends_normal_and_drains_until_peer_close() {
        // Peer pings once, then acknowledges the close.
        let io = MockTransport::new()
            .data(&[0x89, 0x01, b'x'])
            .data(&[0x88, 0x02, 0x03, 0xE8]);
        let mut ws = session(io, Role::Client);

        ws.close().await.unwrap();
        assert!(!ws.is_open());
        assert!(ws.transport().shutdown_called);

        let frames = parse_sent(&ws.transport().sent);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], (OpCode::Close, vec![0x03, 0xE8]));
        assert_eq!(frames[1], (OpCode::Pong, b"x".to_vec()));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let io = MockTransport::new().data(&[0x88, 0x02, 0x03, 0xE8]);
        let mut ws = session(io, Role::Client);

        ws.close().await.unwrap();
        let sent_after_first = ws.transport().sent.len();
        ws.close().await.unwrap();
        assert_eq!(ws.transport().sent.len(), sent_after_first);
    }

    #[tokio::test]
    async fn close_after_peer_close_sends_nothing_more() {
        let io = MockTransport::new().data(&[0x88, 0x00]);
        let mut ws = session(io, Role::Client);

        let mut buf = [0u8; 16];
        assert_eq!(ws.recv(&mut buf).await.unwrap(), Received::Closed);
        let sent_after_recv = ws.transport().sent.len();

        ws.close().await.unwrap();
        assert_eq!(ws.transport().sent.len(), sent_after_recv);
    }

    #[tokio::test(start_paused = true)]
    async fn close_gives_up_after_the_deadline() {
        let mut io = MockTransport::new();
        for _ in 0..2048 {
            io = io.no_data();
        }
        let mut ws = session(io, Role::Client);

        ws.close().await.unwrap();
        assert!(!ws.is_open());
        assert!(ws.transport().shutdown_called);
    }

    #[tokio::test]
    async fn sends_on_a_closed_session_are_refused() {
        let io = MockTransport::new().closed();
        let mut ws = session(io, Role::Client);
        let mut buf = [0u8; 4];
        assert_eq!(ws.recv(&mut buf).await.unwrap(), Received::Closed);
        assert!(matches!(
            ws.send_text(b"late").await,
            Err(WsError::ConnectionClosed)
        ));
    }
}
