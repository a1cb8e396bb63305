//! Infrastructure layer for a distributed-input node.
//!
//! Contains the adapters around the application controllers: transport
//! endpoints, hardware seams, the TOML config file, and the tokio event
//! loops that own the controllers at run time.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `dinput_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod hardware;
pub mod network;
pub mod runtime;
pub mod storage;
