//! Byte-exact reading over the transient-aware transport.
//!
//! The handshake reads whole header blocks; the frame layer reads exact byte
//! counts. Both go through [`FrameReader`], which owns two things the layers
//! above must never see: the retry loop that turns "no data yet" into either
//! progress or a deadline failure, and the carryover of bytes a fast peer
//! sent past the handshake terminator before the first frame read.

use std::time::Duration;

use bytes::BytesMut;
use tokio::time::{sleep, Instant};

use crate::transport::{RecvStatus, Transport};
use crate::{Result, WsError};

/// Capacity of the handshake header buffer. A header block that does not
/// terminate within this many bytes is rejected.
pub(crate) const HANDSHAKE_BUF: usize = 2048;

/// Pause between receive attempts after an empty window.
const RETRY_PAUSE: Duration = Duration::from_millis(5);

/// Outcome of a byte-exact read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// The buffer was filled completely.
    Filled,
    /// The peer closed before (or instead of) delivering the bytes.
    Closed,
}

/// Deadline-driven reader with pending-byte carryover.
pub(crate) struct FrameReader {
    pending: BytesMut,
    pending_off: usize,
    deadline: Duration,
}

impl FrameReader {
    pub(crate) fn new(deadline: Duration) -> Self {
        FrameReader {
            pending: BytesMut::new(),
            pending_off: 0,
            deadline,
        }
    }

    /// Stash bytes that arrived past the handshake terminator. They are
    /// served to subsequent reads before the transport is touched again.
    pub(crate) fn set_pending(&mut self, bytes: &[u8]) {
        debug_assert!(self.pending_off >= self.pending.len());
        self.pending.clear();
        self.pending.extend_from_slice(bytes);
        self.pending_off = 0;
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending_off < self.pending.len()
    }

    /// Fill `buf` completely, draining pending bytes first.
    ///
    /// `Closed` is an outcome, not an error; `Timeout` surfaces once the
    /// whole-read deadline expires without progress completing the buffer.
    pub(crate) async fn read_exact<T: Transport>(
        &mut self,
        io: &mut T,
        buf: &mut [u8],
    ) -> Result<ReadOutcome> {
        let mut filled = 0;

        // Serve the carryover before touching the transport.
        let stashed = self.pending.len() - self.pending_off;
        if stashed > 0 {
            let take = stashed.min(buf.len());
            buf[..take].copy_from_slice(&self.pending[self.pending_off..self.pending_off + take]);
            self.pending_off += take;
            filled = take;
        }
        if self.pending_off >= self.pending.len() {
            self.pending.clear();
            self.pending_off = 0;
        }
        if filled == buf.len() {
            return Ok(ReadOutcome::Filled);
        }

        let deadline = Instant::now() + self.deadline;
        loop {
            match io.recv(&mut buf[filled..]).await? {
                RecvStatus::Data(n) => {
                    filled += n;
                    if filled == buf.len() {
                        return Ok(ReadOutcome::Filled);
                    }
                }
                RecvStatus::Closed => return Ok(ReadOutcome::Closed),
                RecvStatus::NoData => {
                    if Instant::now() >= deadline {
                        return Err(WsError::Timeout);
                    }
                    sleep(RETRY_PAUSE).await;
                }
            }
        }
    }

    /// Accumulate bytes until the `\r\n\r\n` header terminator, returning the
    /// header block including the terminator. Bytes past the terminator are
    /// stashed as pending.
    pub(crate) async fn read_until_headers<T: Transport>(&mut self, io: &mut T) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HANDSHAKE_BUF];
        let mut filled = 0;
        let deadline = Instant::now() + self.deadline;

        loop {
            if let Some(end) = find_terminator(&buf[..filled]) {
                if end < filled {
                    self.set_pending(&buf[end..filled]);
                }
                buf.truncate(end);
                return Ok(buf);
            }
            if filled == buf.len() {
                return Err(WsError::HeadersTooLarge);
            }
            match io.recv(&mut buf[filled..]).await? {
                RecvStatus::Data(n) => filled += n,
                RecvStatus::Closed => return Err(WsError::ConnectionClosed),
                RecvStatus::NoData => {
                    if Instant::now() >= deadline {
                        return Err(WsError::Timeout);
                    }
                    sleep(RETRY_PAUSE).await;
                }
            }
        }
    }
}

/// Position one past the `\r\n\r\n` terminator, if present.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}
