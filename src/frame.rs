//! RFC 6455 frame codec: header parsing, validation, encoding, and the
//! payload read/write paths.
//!
//! Frames are single-shot: FIN is always set on outgoing frames and required
//! on incoming ones, and the continuation opcode is rejected. Outgoing
//! masked payloads stream through a bounded scratch buffer so a large send
//! never allocates a payload-sized copy.

use log::warn;

use crate::mask::{apply_mask, apply_mask_offset};
use crate::reader::{FrameReader, ReadOutcome};
use crate::session::Role;
use crate::transport::Transport;
use crate::{Result, WsError};

/// Largest possible frame header: 2 base bytes, 8 extended-length bytes,
/// 4 mask-key bytes.
pub(crate) const MAX_HEADER: usize = 14;

/// A WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message. Parsed but always rejected by
    /// validation; fragmentation is unsupported.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Connection close.
    Close,
    /// Ping, to be answered with a pong carrying the same payload.
    Ping,
    /// Pong, either a ping reply or a unidirectional heartbeat.
    Pong,
}

impl OpCode {
    /// Close, ping and pong are control frames.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Text and binary carry application data.
    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            b => Err(WsError::InvalidOpCode(b)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> Self {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A parsed frame header. Ephemeral; lives only for the duration of one
/// receive step.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Final fragment bit. Always required here.
    pub fin: bool,
    /// Reserved bit 1. Must be zero; no extensions are negotiated.
    pub rsv1: bool,
    /// Reserved bit 2. Must be zero.
    pub rsv2: bool,
    /// Reserved bit 3. Must be zero.
    pub rsv3: bool,
    /// Whether the payload is masked with `mask_key`.
    pub masked: bool,
    /// The frame opcode.
    pub opcode: OpCode,
    /// Declared payload length.
    pub payload_len: u64,
    /// Masking key; meaningful only when `masked` is set.
    pub mask_key: [u8; 4],
}

impl FrameHeader {
    /// Enforce the validation rules for a frame received in the given role.
    ///
    /// A server rejects unmasked frames outright. A client tolerates masked
    /// frames (it can still unmask them) but logs the violation, since
    /// server-to-client frames must not be masked.
    pub(crate) fn validate(&self, role: Role) -> Result<()> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(WsError::ReservedBitsNotZero);
        }
        if !self.fin || self.opcode == OpCode::Continuation {
            return Err(WsError::FragmentationUnsupported);
        }
        if self.opcode.is_control() && self.payload_len > 125 {
            return Err(WsError::ControlFrameTooLarge);
        }
        if self.opcode == OpCode::Close && self.payload_len == 1 {
            return Err(WsError::InvalidCloseFrame);
        }
        match role {
            Role::Server => {
                if !self.masked {
                    return Err(WsError::MissingFrameMask);
                }
            }
            Role::Client => {
                if self.masked {
                    warn!("received a masked frame from the server");
                }
            }
        }
        Ok(())
    }
}

/// Outcome of a header read.
pub(crate) enum HeaderRead {
    Frame(FrameHeader),
    /// The peer closed before a full header arrived.
    Closed,
}

/// Outcome of a payload read.
#[derive(Debug)]
pub(crate) enum PayloadRead {
    /// The payload is in the destination buffer, `usize` bytes long.
    Complete(usize),
    /// The peer closed mid-payload.
    Closed,
}

/// Read one frame header: 2 base bytes, then the extended length, then the
/// mask key when present.
pub(crate) async fn read_header<T: Transport>(
    rd: &mut FrameReader,
    io: &mut T,
) -> Result<HeaderRead> {
    let mut base = [0u8; 2];
    if rd.read_exact(io, &mut base).await? == ReadOutcome::Closed {
        return Ok(HeaderRead::Closed);
    }

    let opcode = OpCode::try_from(base[0] & 0x0F)?;
    let masked = base[1] & 0x80 != 0;

    let payload_len = match base[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            if rd.read_exact(io, &mut ext).await? == ReadOutcome::Closed {
                return Ok(HeaderRead::Closed);
            }
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            if rd.read_exact(io, &mut ext).await? == ReadOutcome::Closed {
                return Ok(HeaderRead::Closed);
            }
            u64::from_be_bytes(ext)
        }
        n => n as u64,
    };

    let mut mask_key = [0u8; 4];
    if masked && rd.read_exact(io, &mut mask_key).await? == ReadOutcome::Closed {
        return Ok(HeaderRead::Closed);
    }

    Ok(HeaderRead::Frame(FrameHeader {
        fin: base[0] & 0x80 != 0,
        rsv1: base[0] & 0x40 != 0,
        rsv2: base[0] & 0x20 != 0,
        rsv3: base[0] & 0x10 != 0,
        masked,
        opcode,
        payload_len,
        mask_key,
    }))
}

/// Encode a frame header into `head`, returning how many bytes were written.
/// Uses the minimal length encoding the RFC requires.
pub(crate) fn encode_header(
    head: &mut [u8; MAX_HEADER],
    opcode: OpCode,
    payload_len: usize,
    mask: Option<[u8; 4]>,
) -> usize {
    head[0] = 0x80 | u8::from(opcode);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let mut at = if payload_len < 126 {
        head[1] = mask_bit | payload_len as u8;
        2
    } else if payload_len < 65536 {
        head[1] = mask_bit | 126;
        head[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
        4
    } else {
        head[1] = mask_bit | 127;
        head[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
        10
    };

    if let Some(key) = mask {
        head[at..at + 4].copy_from_slice(&key);
        at += 4;
    }
    at
}

/// Read a frame payload into `dst`.
///
/// A payload larger than `dst` is drained through `scratch` in bounded
/// chunks so the stream stays frame-aligned, then reported as an overflow.
/// Masked payloads are unmasked in place.
pub(crate) async fn read_payload<T: Transport>(
    rd: &mut FrameReader,
    io: &mut T,
    hdr: &FrameHeader,
    dst: &mut [u8],
    scratch: &mut [u8],
) -> Result<PayloadRead> {
    let len = hdr.payload_len;
    if len > dst.len() as u64 {
        drain_payload(rd, io, len, scratch).await?;
        return Err(WsError::PayloadTooLarge {
            len,
            capacity: dst.len(),
        });
    }

    let len = len as usize;
    if rd.read_exact(io, &mut dst[..len]).await? == ReadOutcome::Closed {
        return Ok(PayloadRead::Closed);
    }
    if hdr.masked {
        apply_mask(&mut dst[..len], hdr.mask_key);
    }
    Ok(PayloadRead::Complete(len))
}

/// Discard `len` payload bytes through `scratch`.
pub(crate) async fn drain_payload<T: Transport>(
    rd: &mut FrameReader,
    io: &mut T,
    len: u64,
    scratch: &mut [u8],
) -> Result<()> {
    let mut remaining = len;
    while remaining > 0 {
        let take = remaining.min(scratch.len() as u64) as usize;
        if rd.read_exact(io, &mut scratch[..take]).await? == ReadOutcome::Closed {
            break;
        }
        remaining -= take as u64;
    }
    Ok(())
}

/// Write one complete frame. When `mask` is set, a fresh random key is
/// generated and the payload is masked chunk-by-chunk through `scratch`,
/// carrying the key phase across chunk boundaries.
pub(crate) async fn write_frame<T: Transport>(
    io: &mut T,
    opcode: OpCode,
    payload: &[u8],
    mask: bool,
    scratch: &mut [u8],
) -> Result<()> {
    let key = mask.then(rand::random::<[u8; 4]>);

    let mut head = [0u8; MAX_HEADER];
    let head_len = encode_header(&mut head, opcode, payload.len(), key);
    send_all(io, &head[..head_len]).await?;

    match key {
        None => send_all(io, payload).await,
        Some(key) => {
            let mut offset = 0;
            while offset < payload.len() {
                let take = (payload.len() - offset).min(scratch.len());
                scratch[..take].copy_from_slice(&payload[offset..offset + take]);
                apply_mask_offset(&mut scratch[..take], key, offset);
                send_all(io, &scratch[..take]).await?;
                offset += take;
            }
            Ok(())
        }
    }
}

/// Write the whole buffer, looping over partial sends.
pub(crate) async fn send_all<T: Transport>(io: &mut T, buf: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        let n = io.send(&buf[sent..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "transport accepted no bytes",
            )
            .into());
        }
        sent += n;
    }
    Ok(())
}
