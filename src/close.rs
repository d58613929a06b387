//! Close codes and close-frame payload handling.

use std::fmt;

/// A WebSocket close code as defined in
/// [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
///
/// The engine only ever produces [`CloseCode::NORMAL`] and
/// [`CloseCode::PROTOCOL_ERROR`] itself; codes received from the peer are
/// carried through opaquely (logged and mirrored in the close reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000: normal closure.
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// 1002: the peer violated the protocol.
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest close reason we keep: 125 bytes of control payload minus the
/// 2-byte code.
const MAX_REASON: usize = 123;

/// Split a close-frame payload into its code and optional UTF-8 reason.
///
/// An empty payload carries neither. Validation has already rejected the
/// malformed 1-byte case before this is called.
pub(crate) fn decode_close(payload: &[u8]) -> (Option<CloseCode>, Option<String>) {
    if payload.len() < 2 {
        return (None, None);
    }
    let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
    let rest = &payload[2..payload.len().min(2 + MAX_REASON)];
    let reason = if rest.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(rest).into_owned())
    };
    (Some(code), reason)
}

/// Build a close-frame payload carrying just a code.
pub(crate) fn encode_close(code: CloseCode) -> [u8; 2] {
    code.0.to_be_bytes()
}
