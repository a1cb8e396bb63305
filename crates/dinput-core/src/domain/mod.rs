//! Domain types for distributed input sharing.
//!
//! # What lives here? (for beginners)
//!
//! The *domain* layer holds plain data and pure logic that every other layer
//! agrees on.  Nothing in here performs I/O, spawns tasks, or talks to the
//! operating system, which makes it trivially unit-testable.
//!
//! - **`ids`** – Strongly typed identifiers: [`ids::DeviceId`] for a networked
//!   peer, [`ids::HandleId`] for one physical input device, [`ids::SessionId`]
//!   for one open channel, and the [`ids::InputTypeMask`] bitmask.
//!
//! - **`event`** – Captured input events, held-key reports, and the device
//!   descriptions returned by the hardware collector.
//!
//! - **`sharing`** – The [`sharing::SharingStateTracker`], the single source
//!   of truth for whether a device handle is forwarded to a remote node
//!   (`ThroughOut`) or delivered locally (`ThroughIn`).

pub mod event;
pub mod ids;
pub mod sharing;
