//! Configuration Modules
//!
//! Aggregates system-level runtime configuration providers.

/// Provides system-level configuration management.
pub mod config_sys;
