//! Typed error enums for each layer of the runtime. Handler/user-facing
//! failures are translated into HTTP responses by the router (see
//! `router::Router::dispatch`); transport-level failures never reach a user.

use thiserror::Error;

/// Failures from `Acceptor::init`.
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("failed to resolve bind address: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("failed to configure listening socket: {0}")]
    Socket(#[source] std::io::Error),
    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),
}

/// Failures while sniffing a freshly-accepted connection for TLS.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("connection closed before any bytes were read")]
    EmptyStream,
    #[error("detection deadline elapsed")]
    TimedOut,
    #[error("I/O error during detection: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced while reading/parsing one HTTP request.
///
/// Each non-transport variant carries the status code the session should
/// synthesize a response with.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed HTTP request: {0}")]
    Malformed(String),
    #[error("request body of {actual} bytes exceeds the configured limit of {limit} bytes")]
    BodyTooLarge { actual: usize, limit: usize },
    #[error("idle timeout waiting for request data")]
    IdleTimeout,
    #[error("connection closed by peer")]
    Eof,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Status code a session should respond with before closing, or `None`
    /// when the error means "nothing more to write" (EOF/transport).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProtocolError::Malformed(_) => Some(400),
            ProtocolError::BodyTooLarge { .. } => Some(413),
            ProtocolError::IdleTimeout => Some(408),
            ProtocolError::Eof | ProtocolError::Io(_) => None,
        }
    }
}

/// Errors a handler can return; the router maps these to JSON error bodies.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("{0}")]
    Other(String),
}

/// Failures from the shared connect-with-timeout primitive (§4.9).
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect deadline elapsed")]
    TimedOut,
    #[error("DNS resolution failed: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("TCP connect failed: {0}")]
    Tcp(#[source] std::io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
}

/// Failures from the hand-rolled wire-level HTTP client.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failures from the SMTP client's command/response state machine.
#[derive(Debug, Error)]
pub enum SmtpError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected status {actual} at {stage}, expected {expected}")]
    UnexpectedStatus {
        stage: &'static str,
        expected: u16,
        actual: u16,
    },
}

/// Failures from the STOMP client.
#[derive(Debug, Error)]
pub enum StompError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server heartbeat/inactivity timeout")]
    TimedOut,
}

/// Failures from the WebSocket Secure client.
#[derive(Debug, Error)]
pub enum WssClientError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("WebSocket protocol error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failures from the server-side WebSocket upgrade handshake and session.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("upgrade request is missing Sec-WebSocket-Key")]
    MissingKey,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket protocol error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),
}
