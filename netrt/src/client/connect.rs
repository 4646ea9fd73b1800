//! The connect-with-timeout primitive shared by every client (§4.9): one
//! deadline covers resolve, TCP connect, and (for TLS) the handshake, the
//! same way the original's `req_timeout_timer_` was armed once per
//! `connect()` call and cancelled on whichever completion path won. Here the
//! "timer" is just `tokio::time::timeout` racing the whole attempt, which
//! drops (and so closes) whatever partial connection was in flight.

use std::time::Duration;

use tokio::net::TcpStream;
#[cfg(feature = "tls")]
use tokio_rustls::client::TlsStream;
#[cfg(feature = "tls")]
use tokio_rustls::TlsConnector;

use crate::error::ConnectError;

/// Resolves `host:port` and connects a TCP socket, the whole attempt bounded
/// by `deadline`.
pub async fn connect_tcp(host: &str, port: u16, deadline: Duration) -> Result<TcpStream, ConnectError> {
    tokio::time::timeout(deadline, connect_tcp_inner(host, port))
        .await
        .map_err(|_| ConnectError::TimedOut)?
}

async fn connect_tcp_inner(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(ConnectError::Resolve)?
        .next()
        .ok_or_else(|| {
            ConnectError::Resolve(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses resolved",
            ))
        })?;
    TcpStream::connect(addr).await.map_err(ConnectError::Tcp)
}

/// As `connect_tcp`, but TCP connect and TLS handshake share one deadline —
/// §4.9 step 1 wraps "the whole resolve+connect(+handshake) future".
#[cfg(feature = "tls")]
pub async fn connect_tls(
    host: &str,
    port: u16,
    deadline: Duration,
    connector: &TlsConnector,
) -> Result<TlsStream<TcpStream>, ConnectError> {
    tokio::time::timeout(deadline, connect_tls_inner(host, port, connector))
        .await
        .map_err(|_| ConnectError::TimedOut)?
}

#[cfg(feature = "tls")]
async fn connect_tls_inner(
    host: &str,
    port: u16,
    connector: &TlsConnector,
) -> Result<TlsStream<TcpStream>, ConnectError> {
    let tcp = connect_tcp_inner(host, port).await?;
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| ConnectError::Tls(e.to_string()))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ConnectError::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_a_listening_local_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await });

        let stream = connect_tcp("127.0.0.1", addr.port(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(stream.peer_addr().unwrap().port() == addr.port());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn resolve_failure_is_reported_as_a_connect_error() {
        let err = connect_tcp("", 0, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ConnectError::Resolve(_) | ConnectError::Tcp(_)));
    }
}
