//! WebSocket support (§4.5): the manual RFC 6455 accept handshake and the
//! per-connection session driver.

mod handshake;
mod session;

pub use session::{run, upgrade, SendResult, WsCallbacks, WsHandle, WsMessageKind};
