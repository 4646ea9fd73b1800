//! `netrt` — a dual-protocol HTTP/HTTPS + WebSocket server runtime with a
//! routing/dispatch layer and a family of async protocol clients sharing a
//! common connect-with-timeout primitive.
//!
//! The pipeline: `Acceptor -> Detector -> HttpSession -> (WsSession | Router
//! -> Executor -> handler -> Response)`. See `server::Server` for the
//! top-level assembly of these pieces.

pub mod acceptor;
pub mod client;
pub mod detect;
pub mod error;
pub mod executor;
pub mod http;
pub mod registry;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod settings;
pub mod tls;
pub mod ws;

pub use error::{AcceptError, ConnectError, DetectError, HandlerError, ProtocolError};
pub use executor::Executor;
pub use registry::{Registry, SessionId, SessionKind};
pub use request::{Request, RouteRequest};
pub use response::{Body, Response};
pub use router::Router;
pub use server::{Server, ServerError};
pub use settings::Settings;
