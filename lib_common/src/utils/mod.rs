//! Miscellaneous helpers shared across binaries.

pub mod misc;
