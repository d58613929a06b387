//! Client-side connection establishment.

use log::debug;

use crate::config::ConnectConfig;
use crate::frame::send_all;
use crate::handshake;
use crate::reader::FrameReader;
use crate::session::{Role, Session};
use crate::transport::{NetTransport, Transport};
use crate::Result;

impl Session<NetTransport> {
    /// Dial `cfg.host:cfg.port` (TLS when configured), perform the upgrade
    /// handshake, and return the established session.
    pub async fn connect(cfg: &ConnectConfig) -> Result<Self> {
        let io = NetTransport::connect(cfg).await?;
        Session::client_over(io, cfg).await
    }
}

impl<T: Transport> Session<T> {
    /// Perform the client handshake over an already-connected transport.
    ///
    /// On failure the transport is dropped; there is no session to clean up.
    /// Bytes the server sends past the response terminator (an eager first
    /// frame) are preserved for the session's first read.
    pub async fn client_over(mut io: T, cfg: &ConnectConfig) -> Result<Self> {
        let key = handshake::generate_key();
        let request = handshake::build_client_request(cfg, &key);
        send_all(&mut io, request.as_bytes()).await?;

        let mut reader = FrameReader::new(cfg.timeouts.recv_deadline);
        let head = reader.read_until_headers(&mut io).await?;
        handshake::validate_client_response(&head, &key)?;
        debug!("client handshake complete with {}:{}", cfg.host, cfg.port);

        Ok(Session::new(io, Role::Client, reader, cfg.timeouts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use crate::WsError;

    fn config() -> ConnectConfig {
        ConnectConfig::new("localhost", 8081, "/")
    }

    #[tokio::test]
    async fn non_101_response_is_rejected() {
        let io = MockTransport::new().data(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        assert!(matches!(
            Session::client_over(io, &config()).await,
            Err(WsError::InvalidStatusCode(400))
        ));
    }

    #[tokio::test]
    async fn wrong_accept_key_is_rejected() {
        // A syntactically valid 101 whose accept value cannot match any
        // freshly generated key.
        let io = MockTransport::new().data(
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Accept: bm90IGEgcmVhbCBhY2NlcHQga2V5\r\n\r\n",
        );
        assert!(matches!(
            Session::client_over(io, &config()).await,
            Err(WsError::AcceptKeyMismatch)
        ));
    }

    #[tokio::test]
    async fn eof_during_handshake_is_fatal() {
        let io = MockTransport::new().data(b"HTTP/1.1 101 Swi").closed();
        assert!(matches!(
            Session::client_over(io, &config()).await,
            Err(WsError::ConnectionClosed)
        ));
    }
}
