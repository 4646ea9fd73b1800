//! Top-level assembly (§6 "External Interfaces"): wires the Acceptor, the
//! TLS sniffer, the HTTP session, the WebSocket upgrade, and the
//! Router/Executor into one `Server` with a single `init`/`run`/`stop`
//! lifecycle, mirroring how `servers::server_speak`'s `tokio_main` wires its
//! own accept loop together by hand, but generalized into a reusable type.

use std::net::SocketAddr;
#[cfg(feature = "tls")]
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acceptor::Acceptor;
use crate::detect::{detect, Detection};
use crate::error::AcceptError;
use crate::executor::Executor;
use crate::http::{HttpSession, SessionOutcome};
use crate::registry::{Registry, SessionId, SessionKind};
use crate::router::Router;
use crate::settings::Settings;
use crate::tls::{PrefixedStream, Stream};
#[cfg(feature = "tls")]
use crate::tls::{self, TlsConfigError};
use crate::ws::{self, WsCallbacks, WsHandle, WsMessageKind};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Accept(#[from] AcceptError),
    #[cfg(feature = "tls")]
    #[error(transparent)]
    TlsConfig(#[from] TlsConfigError),
}

fn no_op_ws_callbacks() -> WsCallbacks {
    WsCallbacks {
        on_open: Arc::new(|_handle, _is_tls| {}),
        on_msg: Arc::new(|_handle, _payload, _kind| {}),
        on_close: Arc::new(|_id| {}),
    }
}

/// The assembled server. Configure routes and callbacks, `init()` a
/// listening address, then `run()` to serve until `stop()` is called.
pub struct Server {
    acceptor: Acceptor,
    settings: Settings,
    router: Arc<Router>,
    executor: Executor,
    registry: Registry,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<rustls::ServerConfig>>,
    ws_callbacks: Arc<WsCallbacks>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(executor: Executor) -> Self {
        Server {
            acceptor: Acceptor::new(),
            settings: Settings::default(),
            router: Arc::new(Router::new()),
            executor,
            registry: Registry::new(),
            #[cfg(feature = "tls")]
            tls_config: None,
            ws_callbacks: Arc::new(no_op_ws_callbacks()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Mutable access to the route table. Valid only before the first call
    /// to `run()`: `Router` configuration is populated up front and treated
    /// as immutable thereafter (§5), so this panics if `run()` has already
    /// handed a clone of the router Arc to a connection task.
    pub fn router_mut(&mut self) -> &mut Router {
        Arc::get_mut(&mut self.router)
            .expect("Server::router_mut must be called before run()")
    }

    pub fn set_timeout(&mut self, duration: Duration) -> &mut Self {
        self.settings.set_timeout(duration);
        self
    }

    pub fn set_request_body_limit(&mut self, bytes: usize) -> &mut Self {
        self.settings.set_request_body_limit(bytes);
        self
    }

    pub fn set_request_queue_limit(&mut self, depth: usize) -> &mut Self {
        self.settings.set_request_queue_limit(depth);
        self
    }

    /// Loads `fullchain.pem`/`privkey.pem` from `cert_dir` and enables TLS:
    /// from then on, a detected ClientHello is handed a real handshake
    /// instead of being dropped as unsupported.
    #[cfg(feature = "tls")]
    pub fn enable_tls(&mut self, cert_dir: &Path) -> Result<&mut Self, TlsConfigError> {
        self.tls_config = Some(tls::load_server_config(cert_dir)?);
        Ok(self)
    }

    pub fn on_ws_open<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(WsHandle, bool) + Send + Sync + 'static,
    {
        self.ws_callback_mut().on_open = Arc::new(f);
        self
    }

    pub fn on_ws_msg<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(WsHandle, Vec<u8>, WsMessageKind) + Send + Sync + 'static,
    {
        self.ws_callback_mut().on_msg = Arc::new(f);
        self
    }

    pub fn on_ws_close<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        self.ws_callback_mut().on_close = Arc::new(f);
        self
    }

    fn ws_callback_mut(&mut self) -> &mut WsCallbacks {
        Arc::get_mut(&mut self.ws_callbacks)
            .expect("Server::on_ws_* must be called before run()")
    }

    /// Lets a handler reach the registry directly, e.g. to call
    /// `registry().broadcast(...)` from an HTTP route.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub async fn init(&mut self, host: &str, port: u16) -> Result<(), AcceptError> {
        self.acceptor.init(host, port).await
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Serves until `stop()` is called. Every accepted connection gets its
    /// own task (§4.2); within it, detection, the HTTP session, and (if
    /// upgraded) the WebSocket session all run in sequence on that one task.
    pub async fn run(&self) {
        let settings = self.settings.clone();
        let router = self.router.clone();
        let executor = self.executor.clone();
        let registry = self.registry.clone();
        #[cfg(feature = "tls")]
        let tls_config = self.tls_config.clone();
        let ws_callbacks = self.ws_callbacks.clone();
        let shutdown = self.shutdown.clone();

        self.acceptor
            .run(self.shutdown.clone(), move |socket, peer| {
                let settings = settings.clone();
                let router = router.clone();
                let executor = executor.clone();
                let registry = registry.clone();
                #[cfg(feature = "tls")]
                let tls_config = tls_config.clone();
                let ws_callbacks = ws_callbacks.clone();
                let shutdown = shutdown.clone();
                async move {
                    #[cfg(feature = "tls")]
                    serve_connection(
                        socket, peer, settings, router, executor, registry, tls_config,
                        ws_callbacks, shutdown,
                    )
                    .await;
                    #[cfg(not(feature = "tls"))]
                    serve_connection(
                        socket, peer, settings, router, executor, registry, ws_callbacks, shutdown,
                    )
                    .await;
                }
            })
            .await;
    }

    /// Cancels the accept loop and asks every live session to close. Safe to
    /// call more than once (§7 idempotence).
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.registry.broadcast_shutdown().await;
    }

    pub fn live_sessions(&self) -> usize {
        self.registry.live_count()
    }
}

#[cfg(feature = "tls")]
#[allow(clippy::too_many_arguments)]
async fn serve_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    settings: Settings,
    router: Arc<Router>,
    executor: Executor,
    registry: Registry,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    ws_callbacks: Arc<WsCallbacks>,
    shutdown: CancellationToken,
) {
    let detection = match detect(&mut socket, settings.detect_timeout).await {
        Ok(detection) => detection,
        Err(e) => {
            debug!(%peer, error = %e, "dropping connection during protocol detection");
            return;
        }
    };

    // `Plain` bytes already read belong to the HTTP session's own read
    // buffer; `Tls` bytes already read belong one layer down, ahead of the
    // TLS handshake, so they go through `PrefixedStream` instead.
    let (stream, http_buffered_prefix, is_tls) = match detection {
        Detection::Plain(prefix) => (Stream::Plain(socket), prefix, false),
        Detection::Tls(prefix) => {
            let Some(config) = tls_config else {
                debug!(%peer, "rejecting TLS connection: server has no certificate configured");
                return;
            };
            let acceptor = tls::acceptor(config);
            match acceptor.accept(PrefixedStream::new(prefix, socket)).await {
                Ok(tls_stream) => (Stream::ServerTls(Box::new(tls_stream)), Vec::new(), true),
                Err(e) => {
                    warn!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            }
        }
    };

    drive_session(
        stream, http_buffered_prefix, is_tls, peer, settings, router, executor, registry,
        ws_callbacks, shutdown,
    )
    .await;
}

/// Without the `tls` feature there is no certificate to hand a ClientHello,
/// so a detected TLS connection is simply dropped instead of handshaked.
#[cfg(not(feature = "tls"))]
#[allow(clippy::too_many_arguments)]
async fn serve_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    settings: Settings,
    router: Arc<Router>,
    executor: Executor,
    registry: Registry,
    ws_callbacks: Arc<WsCallbacks>,
    shutdown: CancellationToken,
) {
    let detection = match detect(&mut socket, settings.detect_timeout).await {
        Ok(detection) => detection,
        Err(e) => {
            debug!(%peer, error = %e, "dropping connection during protocol detection");
            return;
        }
    };

    let (stream, http_buffered_prefix, is_tls) = match detection {
        Detection::Plain(prefix) => (Stream::Plain(socket), prefix, false),
        Detection::Tls(_) => {
            debug!(%peer, "rejecting TLS connection: built without the `tls` feature");
            return;
        }
    };

    drive_session(
        stream, http_buffered_prefix, is_tls, peer, settings, router, executor, registry,
        ws_callbacks, shutdown,
    )
    .await;
}

/// Runs one connection's HTTP session through to completion and, if it
/// upgraded, the WebSocket session after it — shared by both the TLS and
/// plain-only builds once the stream has been resolved.
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    stream: Stream,
    http_buffered_prefix: Vec<u8>,
    is_tls: bool,
    peer: SocketAddr,
    settings: Settings,
    router: Arc<Router>,
    executor: Executor,
    registry: Registry,
    ws_callbacks: Arc<WsCallbacks>,
    shutdown: CancellationToken,
) {
    let (_id, mut control_rx, _guard) = registry.register(SessionKind::Http);
    let session = HttpSession::new(
        stream,
        http_buffered_prefix,
        settings,
        router,
        executor,
        is_tls,
    );

    let outcome = tokio::select! {
        biased;
        _ = control_rx.recv() => {
            debug!(%peer, "http session closing: server shutdown in progress");
            return;
        }
        outcome = session.run() => outcome,
    };

    if shutdown.is_cancelled() {
        return;
    }

    if let SessionOutcome::Upgraded {
        stream,
        buffered,
        request,
    } = outcome
    {
        // Any bytes already buffered past the upgrade request's head belong
        // to the client's first WebSocket frame(s); tungstenite needs to see
        // them too, so replay them the same way the TLS handshake does.
        let stream = PrefixedStream::new(buffered, stream);
        match ws::upgrade(stream, &request).await {
            Ok(ws_stream) => {
                info!(%peer, "upgraded to WebSocket");
                ws::run(ws_stream, is_tls, registry, ws_callbacks).await;
            }
            Err(e) => {
                warn!(%peer, error = %e, "WebSocket handshake failed");
            }
        }
    }
}
