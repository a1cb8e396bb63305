//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate
//!   directory or an explicit path.
//! - Writing a configuration back to disk.
//! - Providing sensible defaults when the file does not exist yet.
//!
//! The node keeps no persisted protocol state; sessions and sharing are
//! rebuilt from scratch on every start.

pub mod config;
