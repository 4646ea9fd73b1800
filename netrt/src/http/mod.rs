//! HTTP/1.1 parsing and the pipelined session driver (§4.4).

pub mod parse;
pub mod session;

pub use session::{HttpSession, SessionOutcome};
