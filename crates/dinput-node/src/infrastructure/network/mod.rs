//! Transport adapters for the channel registry.
//!
//! # Sub-modules
//!
//! - **`memory`** – An in-process hub that links endpoints through tokio
//!   channels.  Used by integration tests and the `--demo` mode of the
//!   binary; sessions can be severed on demand to simulate link failure.
//!
//! - **`tcp`** – One TCP listener per endpoint.  Each channel is its own
//!   connection, announced by a short device-id preamble and then carrying
//!   protocol frames back to back.
//!
//! Both adapters only move bytes.  Neither inspects a frame beyond the
//! header length field.

pub mod memory;
pub mod tcp;
