//! Shared process/runtime utilities used by the `servers` and `netrt` crates.

pub mod configs;
pub mod utils;

pub use configs::config_sys::*;
pub use utils::misc::sys_info::*;
