//! Server-side listening and connection acceptance.

use std::net::SocketAddr;

use log::debug;
use tokio::net::TcpListener;

use crate::config::Timeouts;
use crate::frame::send_all;
use crate::handshake;
use crate::reader::FrameReader;
use crate::session::{Role, Session};
use crate::transport::{NetTransport, Transport};
use crate::Result;

/// Accepts TCP connections and upgrades each one into a server [`Session`].
pub struct Listener {
    inner: TcpListener,
    timeouts: Timeouts,
}

impl Listener {
    /// Bind to `0.0.0.0:port` with default timeouts. Port 0 picks an
    /// ephemeral port; see [`Listener::local_addr`].
    pub async fn bind(port: u16) -> Result<Self> {
        Self::bind_with(port, Timeouts::default()).await
    }

    /// Bind with explicit timeouts for the accepted sessions.
    pub async fn bind_with(port: u16, timeouts: Timeouts) -> Result<Self> {
        let inner = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Listener { inner, timeouts })
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept one connection and complete the server handshake on it. A
    /// handshake failure drops the connection and surfaces the error; the
    /// listener itself stays usable.
    pub async fn accept(&self) -> Result<Session<NetTransport>> {
        let (stream, peer) = self.inner.accept().await?;
        debug!("accepted connection from {peer}");
        let io = NetTransport::plain(stream, self.timeouts);
        Session::server_over_with(io, self.timeouts).await
    }
}

impl<T: Transport> Session<T> {
    /// Perform the server handshake over an already-accepted transport.
    pub async fn server_over(io: T) -> Result<Self> {
        Self::server_over_with(io, Timeouts::default()).await
    }

    /// Like [`Session::server_over`] with explicit timeouts.
    ///
    /// Bytes the client sends past the request terminator (an eager first
    /// frame) are preserved for the session's first read.
    pub async fn server_over_with(mut io: T, timeouts: Timeouts) -> Result<Self> {
        let mut reader = FrameReader::new(timeouts.recv_deadline);
        let head = reader.read_until_headers(&mut io).await?;
        let key = handshake::validate_server_request(&head)?;

        let response = handshake::build_server_response(&handshake::accept_key(&key));
        send_all(&mut io, response.as_bytes()).await?;
        debug!("server handshake complete");

        Ok(Session::new(io, Role::Server, reader, timeouts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::apply_mask;
    use crate::session::Received;
    use crate::transport::testing::MockTransport;
    use crate::frame::OpCode;
    use crate::WsError;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[tokio::test]
    async fn handshake_replies_with_matching_accept_key() {
        let io = MockTransport::new().data(REQUEST);
        let ws = Session::server_over(io).await.unwrap();
        assert_eq!(ws.role(), Role::Server);

        let sent = String::from_utf8(ws.transport().sent.clone()).unwrap();
        assert!(sent.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(sent.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn invalid_request_fails_the_handshake() {
        let io = MockTransport::new().data(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
        assert!(matches!(
            Session::server_over(io).await,
            Err(WsError::InvalidUpgradeHeader)
        ));
    }

    #[tokio::test]
    async fn bytes_past_the_request_feed_the_first_frame_read() {
        // The client's first masked frame rides in the same chunk as the
        // upgrade request.
        let key = [0x01, 0x02, 0x03, 0x04];
        let mut body = b"hi".to_vec();
        apply_mask(&mut body, key);
        let mut chunk = REQUEST.to_vec();
        chunk.extend_from_slice(&[0x81, 0x80 | 2]);
        chunk.extend_from_slice(&key);
        chunk.extend_from_slice(&body);

        let io = MockTransport::new().data(&chunk);
        let mut ws = Session::server_over(io).await.unwrap();

        let mut buf = [0u8; 16];
        let got = ws.recv(&mut buf).await.unwrap();
        assert_eq!(
            got,
            Received::Frame {
                opcode: OpCode::Text,
                len: 2
            }
        );
        assert_eq!(&buf[..2], b"hi");
    }
}
