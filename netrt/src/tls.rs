//! TLS support for the server side of the runtime (§6 "TLS: TLS 1.2+"),
//! gated behind the `tls` Cargo feature (default-on). `Stream` and
//! `PrefixedStream` stay available regardless of the feature — every
//! connection, TLS or not, flows through `Stream::Plain` — only the
//! certificate-loading and handshake machinery is feature-gated.
//!
//! `load_server_config` loads a certificate chain and private key the same
//! way `servers::server_dummy::load_rustls_config` does, but returns a typed
//! error instead of panicking, since a library has no business calling
//! `expect()` on its embedder's behalf. `Stream` is the tagged union the
//! session types are generic over (§9 "two stream types with a common
//! session algorithm" — realized here as an enum rather than a trait object
//! so both variants keep a concrete, `Unpin` type).

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use std::fs::File;
#[cfg(feature = "tls")]
use std::io::BufReader;
#[cfg(feature = "tls")]
use std::path::Path;
#[cfg(feature = "tls")]
use std::sync::Arc;

#[cfg(feature = "tls")]
use rustls_pki_types::PrivateKeyDer;
#[cfg(feature = "tls")]
use thiserror::Error;
#[cfg(feature = "tls")]
use tokio_rustls::{TlsAcceptor, TlsConnector};

#[cfg(feature = "tls")]
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("failed to read {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("invalid certificate/key pair: {0}")]
    Invalid(#[from] rustls::Error),
}

/// Loads `fullchain.pem` + `privkey.pem` (PKCS8, falling back to PKCS1/RSA)
/// from `cert_dir` into a server-side `rustls::ServerConfig`, same file
/// layout as `servers::server_dummy::load_rustls_config`.
#[cfg(feature = "tls")]
pub fn load_server_config(cert_dir: &Path) -> Result<Arc<rustls::ServerConfig>, TlsConfigError> {
    let cert_path = cert_dir.join("fullchain.pem");
    let key_path = cert_dir.join("privkey.pem");

    let cert_file = File::open(&cert_path)
        .map_err(|e| TlsConfigError::Read(cert_path.display().to_string(), e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsConfigError::Read(cert_path.display().to_string(), e))?;
    if cert_chain.is_empty() {
        return Err(TlsConfigError::NoCertificates(cert_path.display().to_string()));
    }

    let key = load_private_key(&key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

#[cfg(feature = "tls")]
fn load_private_key(key_path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let key_file =
        File::open(key_path).map_err(|e| TlsConfigError::Read(key_path.display().to_string(), e))?;
    let mut key_reader = BufReader::new(key_file);
    let mut pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsConfigError::Read(key_path.display().to_string(), e))?;
    if let Some(key) = pkcs8.pop() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let key_file =
        File::open(key_path).map_err(|e| TlsConfigError::Read(key_path.display().to_string(), e))?;
    let mut key_reader = BufReader::new(key_file);
    let mut pkcs1 = rustls_pemfile::rsa_private_keys(&mut key_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsConfigError::Read(key_path.display().to_string(), e))?;
    pkcs1
        .pop()
        .map(PrivateKeyDer::Pkcs1)
        .ok_or_else(|| TlsConfigError::NoPrivateKey(key_path.display().to_string()))
}

#[cfg(feature = "tls")]
pub fn acceptor(config: Arc<rustls::ServerConfig>) -> TlsAcceptor {
    TlsAcceptor::from(config)
}

/// A `rustls::ClientConfig` that accepts any server certificate — §4.9 notes
/// the default verifier accepts all, leaving cert pinning to the embedder.
#[cfg(feature = "tls")]
pub fn insecure_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify))
        .with_no_client_auth()
}

#[cfg(feature = "tls")]
pub fn client_connector(config: rustls::ClientConfig) -> TlsConnector {
    TlsConnector::from(Arc::new(config))
}

#[cfg(feature = "tls")]
#[derive(Debug)]
struct NoVerify;

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Replays bytes already consumed while sniffing (§4.3) ahead of the
/// underlying socket, so the TLS handshake reader sees the ClientHello bytes
/// exactly once regardless of how many the detector peeked at first — the
/// same "no byte is ever lost across the Detector -> Session transition"
/// guarantee `detect::Detection` documents, extended one layer down to the
/// handshake itself.
pub struct PrefixedStream<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        PrefixedStream { prefix, pos: 0, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let remaining = &this.prefix[this.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// The stream type every session is generic over (§9: CRTP splitting plain
/// vs TLS sessions collapses to this tagged enum). Every variant is
/// `AsyncRead + AsyncWrite + Unpin + Send`; the TLS variants only exist when
/// the `tls` feature is enabled.
pub enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    ServerTls(Box<tokio_rustls::server::TlsStream<PrefixedStream<TcpStream>>>),
    #[cfg(feature = "tls")]
    ClientTls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    pub fn is_tls(&self) -> bool {
        !matches!(self, Stream::Plain(_))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Stream::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Stream::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Stream::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Stream::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Stream::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(feature = "tls")]
            Stream::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Stream::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Stream::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
