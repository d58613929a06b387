//! The byte-stream transport the protocol engine runs on.
//!
//! The engine never touches sockets directly; everything goes through the
//! [`Transport`] trait. Its receive contract is deliberately three-valued:
//! bytes arrived, the peer closed in an orderly way, or nothing arrived
//! within the attempt's window. Implementations must never report the latter
//! two as errors, because the engine's retry and close logic depends on
//! telling them apart.
//!
//! [`NetTransport`] is the production implementation: a TCP stream,
//! optionally TLS-wrapped, with per-attempt timeout windows.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, ALL_VERSIONS,
};
use tokio_rustls::TlsConnector;

use crate::config::{ConnectConfig, Protocol, Timeouts, TlsOptions};
use crate::Result;

/// Outcome of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// `n` bytes were placed at the start of the buffer.
    Data(usize),
    /// The peer performed an orderly shutdown. Terminal.
    Closed,
    /// Nothing arrived within this attempt's window. Transient; the caller
    /// decides whether to retry or give up.
    NoData,
}

/// A reliable, ordered byte stream.
///
/// Fatal conditions are `Err`; orderly shutdown and empty windows are `Ok`
/// values of their own. `send` may write fewer bytes than requested.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Try to receive bytes into `buf` within one attempt window.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvStatus>;

    /// Write some prefix of `buf`, returning how many bytes went out.
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Shut the write side down and release the connection.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// A TCP stream that may or may not be TLS-wrapped.
pub enum MaybeTlsStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// The production [`Transport`]: TCP or TLS with timeout windows.
pub struct NetTransport {
    stream: MaybeTlsStream,
    read_window: Duration,
    write_window: Duration,
}

impl NetTransport {
    /// Dial `cfg.host:cfg.port`, wrapping in TLS when the config says `wss`.
    pub async fn connect(cfg: &ConnectConfig) -> Result<Self> {
        let stream = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
        let _ = stream.set_nodelay(true);

        let stream = match cfg.protocol {
            Protocol::Ws => MaybeTlsStream::Plain(stream),
            Protocol::Wss => {
                let connector = tls_connector(&cfg.tls)?;
                let name = cfg.tls.server_name.as_deref().unwrap_or(&cfg.host);
                let name = ServerName::try_from(name.to_owned())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                debug!("starting tls handshake with {}", cfg.host);
                let tls = connector.connect(name, stream).await?;
                MaybeTlsStream::Tls(Box::new(tls))
            }
        };

        Ok(NetTransport {
            stream,
            read_window: cfg.timeouts.read_window,
            write_window: cfg.timeouts.write_window,
        })
    }

    /// Wrap an accepted plain TCP stream (server side).
    pub fn plain(stream: TcpStream, timeouts: Timeouts) -> Self {
        let _ = stream.set_nodelay(true);
        NetTransport {
            stream: MaybeTlsStream::Plain(stream),
            read_window: timeouts.read_window,
            write_window: timeouts.write_window,
        }
    }
}

impl Transport for NetTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvStatus> {
        match timeout(self.read_window, self.stream.read(buf)).await {
            Err(_) => Ok(RecvStatus::NoData),
            Ok(Ok(0)) => Ok(RecvStatus::Closed),
            Ok(Ok(n)) => Ok(RecvStatus::Data(n)),
            Ok(Err(e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(RecvStatus::NoData)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match timeout(self.write_window, self.stream.write(buf)).await {
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write window expired",
            )),
            Ok(res) => res,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

fn tls_connector(tls: &TlsOptions) -> Result<TlsConnector> {
    let provider = Arc::new(ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(ALL_VERSIONS)?;

    let builder = if tls.verify {
        let mut roots = RootCertStore::empty();
        match &tls.trust_anchors {
            Some(certs) => {
                for cert in certs {
                    roots.add(cert.clone())?;
                }
            }
            None => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }
        builder.with_root_certificates(roots)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify { provider }))
    };

    let mut config = match &tls.client_auth {
        Some((chain, key)) => builder.with_client_auth_cert(chain.clone(), key.clone_key())?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts any server certificate. Only reachable when the config disables
/// verification.
#[derive(Debug)]
struct NoVerify {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
