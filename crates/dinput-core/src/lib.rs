//! # dinput-core
//!
//! Shared library for distributed input sharing containing the wire codec,
//! the protocol message set, identifier types, and the sharing-state tracker.
//!
//! This crate is used by both the source and the sink roles of a node.
//! It has zero dependencies on OS APIs, input hardware, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! Distributed input lets a keyboard, mouse, or touchpad that is physically
//! attached to one machine (the *sink*, which owns the hardware) drive
//! another machine (the *source*, which asked for the device).  A third
//! machine can also ask a source to pull input from a sink on its behalf;
//! the source in the middle is then called a *relay*.
//!
//! This crate (`dinput-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   28-byte binary header followed by a JSON object holding the message
//!   fields.  Decoding validates every field before a typed message is
//!   produced, so handlers never see half-parsed input.
//!
//! - **`domain`** – Pure data types with no I/O: device and handle
//!   identifiers, the input-type bitmask, captured input events, and the
//!   [`SharingStateTracker`] which records whether each physical device is
//!   currently forwarded to a remote node or kept local.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `dinput_core::HandleId` instead of `dinput_core::domain::ids::HandleId`.
pub use domain::event::{AllowList, DeviceInfo, InputEvent, KeyStateEntry};
pub use domain::ids::{DeviceId, HandleId, InputTypeMask, RelayToken, SessionId};
pub use domain::sharing::{SharingState, SharingStateTracker};
pub use protocol::codec::{decode_message, encode_message, ParseError};
pub use protocol::messages::DInputMessage;
