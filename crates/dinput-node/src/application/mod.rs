//! Application layer: the session controllers and everything they share.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The *application* layer sits between the domain types in `dinput_core`
//! and the infrastructure (sockets, hardware, files).  Code here:
//!
//! - **Owns the protocol state machines** for both roles of a node.
//! - **Depends on abstractions** (the [`channel_registry::Transport`],
//!   [`sink_session::HardwareCollector`] and
//!   [`source_session::EventInjector`] traits), so infrastructure can be
//!   swapped without changing this code.
//! - **Performs no I/O of its own and never blocks.**  Each controller is
//!   driven by exactly one event loop.
//!
//! # Sub-modules
//!
//! - **`channel_registry`** – Peer ↔ channel index over one transport endpoint.
//! - **`dispatch`** – Decodes inbound frames and routes them to a controller.
//! - **`source_session`** – Requests devices from sinks; relays for others.
//! - **`sink_session`** – Grants devices, drives capture, batches events.
//! - **`relay`** – Token table routing relayed answers back to their origin.
//! - **`pending`** – Content-keyed table of requests awaiting an answer.
//! - **`api`** – The async [`api::DistributedInput`] trait.
//! - **`error`** – [`error::SharingError`] and [`error::HardwareError`].

pub mod api;
pub mod channel_registry;
pub mod dispatch;
pub mod error;
pub mod pending;
pub mod relay;
pub mod sink_session;
pub mod source_session;

#[cfg(test)]
pub(crate) mod test_support;
