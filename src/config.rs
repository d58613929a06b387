//! Connection configuration.
//!
//! A [`ConnectConfig`] is assembled with builder-style `with_*` methods (or
//! parsed from a `ws://`/`wss://` URL) and then handed to
//! [`Session::connect`](crate::Session::connect). It is read once during
//! connection setup; a live session never consults it again.

use std::time::Duration;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use url::Url;

use crate::{Result, WsError};

/// Whether to speak plain TCP or TLS underneath the WebSocket layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `ws://`, plain TCP.
    Ws,
    /// `wss://`, TLS-wrapped TCP.
    Wss,
}

/// Deadlines governing a session's I/O.
///
/// `read_window` and `write_window` bound a single transport attempt;
/// `recv_deadline` bounds a whole logical read (a frame header, a payload, a
/// handshake header block) across retries; `close_deadline` bounds the drain
/// for the peer's close reply.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Window for one transport read attempt. Expiry yields "no data yet",
    /// not an error.
    pub read_window: Duration,
    /// Window for one transport write attempt. Expiry is fatal.
    pub write_window: Duration,
    /// Total budget for completing a logical read.
    pub recv_deadline: Duration,
    /// How long `close()` waits for the peer's close reply.
    pub close_deadline: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            read_window: Duration::from_millis(500),
            write_window: Duration::from_secs(5),
            recv_deadline: Duration::from_secs(5),
            close_deadline: Duration::from_secs(2),
        }
    }
}

/// TLS settings for `wss://` connections.
///
/// Defaults verify the server against the bundled Mozilla roots
/// (`webpki-roots`). Supplying `trust_anchors` replaces that set; disabling
/// `verify` skips certificate validation entirely and must only be used
/// against development endpoints.
#[derive(Debug)]
pub struct TlsOptions {
    /// Replacement trust anchors. `None` uses the webpki-roots bundle.
    pub trust_anchors: Option<Vec<CertificateDer<'static>>>,
    /// Client certificate chain and key for mutual TLS.
    pub client_auth: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    /// SNI/verification name when it differs from the dialed host.
    pub server_name: Option<String>,
    /// Verify the server certificate. Defaults to `true`.
    pub verify: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            trust_anchors: None,
            client_auth: None,
            server_name: None,
            verify: true,
        }
    }
}

/// Everything needed to establish a client session.
#[derive(Debug)]
pub struct ConnectConfig {
    /// Host to dial.
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Request target of the upgrade request, e.g. `/chat`.
    pub resource: String,
    /// Plain or TLS.
    pub protocol: Protocol,
    /// Optional `Origin` header value.
    pub origin: Option<String>,
    /// Optional `Sec-WebSocket-Protocol` request value. Sent as-is; no
    /// negotiation is performed on the response.
    pub subprotocol: Option<String>,
    /// Extra raw header lines (`Name: value`, no CRLF) appended to the
    /// upgrade request.
    pub extra_headers: Vec<String>,
    /// TLS settings, used only when `protocol` is [`Protocol::Wss`].
    pub tls: TlsOptions,
    /// I/O deadlines.
    pub timeouts: Timeouts,
}

impl ConnectConfig {
    /// Plain-TCP config for `host:port` with the given request target.
    pub fn new(host: impl Into<String>, port: u16, resource: impl Into<String>) -> Self {
        ConnectConfig {
            host: host.into(),
            port,
            resource: resource.into(),
            protocol: Protocol::Ws,
            origin: None,
            subprotocol: None,
            extra_headers: Vec::new(),
            tls: TlsOptions::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Parse a `ws://` or `wss://` URL into a config.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        let protocol = match url.scheme() {
            "ws" => Protocol::Ws,
            "wss" => Protocol::Wss,
            _ => return Err(WsError::InvalidUrl),
        };
        let host = url.host_str().ok_or(WsError::InvalidUrl)?.to_owned();
        let port = url.port_or_known_default().ok_or(WsError::InvalidUrl)?;
        let mut resource = url.path().to_owned();
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }
        let mut cfg = ConnectConfig::new(host, port, resource);
        cfg.protocol = protocol;
        Ok(cfg)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    /// Append a raw header line (without CRLF) to the upgrade request.
    pub fn with_header(mut self, line: impl Into<String>) -> Self {
        self.extra_headers.push(line.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}
