//! The async protocol client family (§4.9): HTTP(S), SMTP, STOMP, and WSS,
//! all built on one connect-with-timeout primitive.

pub mod connect;
pub mod http;
#[cfg(feature = "tls")]
pub mod smtp;
pub mod stomp;
#[cfg(feature = "tls")]
pub mod wss;

pub use connect::connect_tcp;
#[cfg(feature = "tls")]
pub use connect::connect_tls;
