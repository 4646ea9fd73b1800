//! The Acceptor owns the listening socket and hands every accepted
//! connection its own `tokio::task` (§4.2) — the per-connection "strand"
//! described in §4.1.

use std::future::Future;
use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::AcceptError;

pub struct Acceptor {
    listener: Option<TcpListener>,
}

impl Acceptor {
    pub fn new() -> Self {
        Acceptor { listener: None }
    }

    /// Resolves `host:port`, opens a socket with `SO_REUSEADDR` set ahead of
    /// bind (so a restarted server doesn't fail on a lingering TIME_WAIT
    /// socket), and starts listening with the maximum backlog.
    ///
    /// Any failure tears the socket back down before returning — `init`
    /// leaves no listener behind on error.
    pub async fn init(&mut self, host: &str, port: u16) -> Result<(), AcceptError> {
        let addr: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(AcceptError::Resolve)?
            .next()
            .ok_or_else(|| {
                AcceptError::Resolve(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses resolved",
                ))
            })?;

        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, None).map_err(AcceptError::Socket)?;
        socket.set_reuse_address(true).map_err(AcceptError::Socket)?;
        socket.set_nonblocking(true).map_err(AcceptError::Socket)?;
        socket
            .bind(&addr.into())
            .map_err(|e| AcceptError::Bind(addr.to_string(), e))?;
        socket
            .listen(i32::MAX)
            .map_err(|e| AcceptError::Bind(addr.to_string(), e))?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|e| AcceptError::Bind(addr.to_string(), e))?;
        self.listener = Some(listener);
        Ok(())
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener
            .as_ref()
            .expect("Acceptor::init must run before local_addr")
            .local_addr()
    }

    /// Accept loop: every accepted socket is spawned onto its own task
    /// running `on_accept`. Errors other than a closed listener are logged
    /// and do not stop the loop. Returns once `shutdown` is cancelled.
    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, on_accept: F)
    where
        F: Fn(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = self
            .listener
            .as_ref()
            .expect("Acceptor::init must run before run");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let fut = on_accept(socket, peer);
                            tokio::spawn(fut);
                        }
                        Err(e) => {
                            warn!(error = %e, "accept error");
                        }
                    }
                }
            }
        }
    }
}

impl Default for Acceptor {
    fn default() -> Self {
        Acceptor::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn init_binds_an_ephemeral_port() {
        let mut acceptor = Acceptor::new();
        acceptor.init("127.0.0.1", 0).await.unwrap();
        assert!(acceptor.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn run_dispatches_accepted_connections() {
        let mut acceptor = Acceptor::new();
        acceptor.init("127.0.0.1", 0).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let shutdown_clone = shutdown.clone();
        let count_clone = count.clone();
        let server = tokio::spawn(async move {
            acceptor
                .run(shutdown_clone, move |_socket, _peer| {
                    let count = count_clone.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
        });

        let _ = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        server.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
