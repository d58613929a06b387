//! # wscore
//! A small implementation of the WebSocket protocol (RFC 6455) for both the
//! client and the server role, built on top of a narrow byte-stream
//! [`Transport`] contract rather than a full HTTP stack.
//!
//! The engine owns the whole upgrade byte stream: it builds and validates the
//! HTTP/1.1 handshake itself, preserves any bytes a fast peer sends past the
//! header terminator, and then drives RFC 6455 framing with strict validation
//! (reserved bits, fragmentation, control-frame constraints, masking
//! direction). Message fragmentation, extensions (compression) and
//! subprotocol negotiation are deliberately not supported; frames are
//! single-shot (FIN always set).
//!
//! One [`Session`] serves exactly one connection. All operations take
//! `&mut self`; a session must not be shared across tasks without external
//! synchronization. Reads are bounded by deadlines rather than cancellation
//! tokens: the transport reports "no data yet" distinctly from "peer closed"
//! and from fatal errors, and the engine retries transient results internally
//! until its deadline expires.
//!
//! # Client Example
//! ```no_run
//! use wscore::{ConnectConfig, Protocol, Received, Session};
//!
//! #[tokio::main]
//! async fn main() -> wscore::Result<()> {
//!     let cfg = ConnectConfig::new("echo.websocket.org", 443, "/")
//!         .with_protocol(Protocol::Wss);
//!     let mut ws = Session::connect(&cfg).await?;
//!
//!     ws.send_text(b"hello").await?;
//!
//!     let mut buf = vec![0u8; 4096];
//!     match ws.recv(&mut buf).await? {
//!         Received::Frame { opcode, len } => {
//!             println!("{opcode:?} frame, {len} bytes");
//!         }
//!         Received::Closed => println!("peer closed"),
//!     }
//!
//!     ws.close().await
//! }
//! ```
//!
//! # Server Example
//! ```no_run
//! use wscore::{Listener, Received};
//!
//! #[tokio::main]
//! async fn main() -> wscore::Result<()> {
//!     let listener = Listener::bind(8081).await?;
//!     loop {
//!         // accept() performs the server-side handshake before returning.
//!         let mut session = listener.accept().await?;
//!         let mut buf = vec![0u8; 1024];
//!         while let Ok(Received::Frame { len, .. }) = session.recv(&mut buf).await {
//!             let echo = buf[..len].to_vec();
//!             session.send_text(&echo).await?;
//!         }
//!     }
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod config;
pub mod frame;
pub mod transport;

mod client;
mod handshake;
mod mask;
mod reader;
mod server;
mod session;

use thiserror::Error;

pub use close::CloseCode;
pub use config::{ConnectConfig, Protocol, Timeouts, TlsOptions};
pub use frame::{FrameHeader, OpCode};
pub use server::Listener;
pub use session::{Received, Role, Session};
pub use transport::{NetTransport, RecvStatus, Transport};

/// A result type for WebSocket operations, using [`WsError`] as the error type.
pub type Result<T> = std::result::Result<T, WsError>;

/// Errors that can occur during WebSocket operations.
///
/// The variants fall into the taxonomy the engine is built around:
///
/// - Transient conditions that exhausted their deadline ([`WsError::Timeout`])
/// - Protocol violations detected on received frames (the session notifies
///   the peer with CLOSE 1002 and shuts down before surfacing these)
/// - Capacity overflow ([`WsError::PayloadTooLarge`]) — the stream is drained
///   to stay aligned and the session remains usable
/// - Handshake failures, which leave the session unusable
/// - Fatal transport or TLS errors
///
/// An orderly shutdown (transport EOF or a peer CLOSE frame) is *not* an
/// error; it surfaces as [`Received::Closed`].
#[derive(Error, Debug)]
pub enum WsError {
    /// A read did not complete within its deadline. The transient "no data
    /// yet" transport result is retried internally; this surfaces only once
    /// the deadline is exhausted. The session stays usable unless the
    /// timeout hit in the middle of a frame payload.
    #[error("Read deadline exceeded")]
    Timeout,

    /// Returned when attempting to operate on a closed session, or when the
    /// transport ends in the middle of a handshake.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A received frame has one of the RSV1/RSV2/RSV3 bits set. No
    /// extensions are negotiated, so all reserved bits must be zero.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A received frame has FIN clear or carries the continuation opcode.
    /// Message fragmentation is not supported.
    #[error("Fragmented frames are not supported")]
    FragmentationUnsupported,

    /// A control frame (close, ping, pong) declares a payload longer than
    /// the 125 bytes RFC 6455 allows.
    #[error("Control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    /// A close frame declares a payload length of exactly 1, which cannot
    /// hold a 16-bit close code and is malformed per RFC 6455.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A server session received an unmasked frame. Client-to-server frames
    /// must always be masked.
    #[error("Client frame is not masked")]
    MissingFrameMask,

    /// A received frame carries an opcode outside the set this engine
    /// understands (text, binary, close, ping, pong).
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A data frame payload is larger than the buffer the caller supplied.
    /// The payload has been drained from the transport so the stream stays
    /// aligned; the session remains usable.
    #[error("Frame payload ({len} bytes) exceeds buffer capacity ({capacity} bytes)")]
    PayloadTooLarge {
        /// Declared payload length of the rejected frame.
        len: u64,
        /// Capacity of the caller-supplied buffer.
        capacity: usize,
    },

    /// The handshake response could not be parsed as an HTTP status line
    /// plus header block.
    #[error("Malformed HTTP upgrade response")]
    BadHttpResponse,

    /// The handshake response carried a status other than 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The 101 response is missing the `Sec-WebSocket-Accept` header.
    #[error("Sec-WebSocket-Accept header is missing")]
    MissingSecWebSocketAccept,

    /// The server's `Sec-WebSocket-Accept` value does not match
    /// base64(SHA1(key + GUID)) for the key this client sent.
    #[error("Sec-WebSocket-Accept does not match the sent key")]
    AcceptKeyMismatch,

    /// The upgrade request is not a well-formed `GET` request.
    #[error("Malformed HTTP upgrade request")]
    BadHttpRequest,

    /// The upgrade request is missing the required `Sec-WebSocket-Key`
    /// header.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The `Upgrade` header is missing or does not equal "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The `Connection` header is missing or does not contain the "Upgrade"
    /// token.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The peer's handshake headers did not fit the handshake buffer before
    /// the `\r\n\r\n` terminator appeared.
    #[error("Handshake headers exceed buffer capacity")]
    HeadersTooLarge,

    /// A URL passed to [`ConnectConfig::from_url`] uses a scheme other than
    /// `ws` or `wss`, or lacks a host.
    #[error("Invalid WebSocket URL")]
    InvalidUrl,

    /// Wraps URL parsing errors from [`ConnectConfig::from_url`].
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /// Wraps TLS configuration and negotiation errors.
    #[error(transparent)]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// Wraps I/O errors from the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
