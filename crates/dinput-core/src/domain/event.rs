//! Input events, held-key reports, and device descriptions.

use serde::{Deserialize, Serialize};

use crate::domain::ids::{HandleId, InputTypeMask};

/// Linux-style event class codes carried in [`InputEvent::event_type`].
pub mod event_type {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_REL: u16 = 0x02;
    pub const EV_ABS: u16 = 0x03;
}

/// Key values carried in `EV_KEY` events and [`KeyStateEntry::value`].
pub mod key_value {
    pub const RELEASED: i32 = 0;
    pub const PRESSED: i32 = 1;
    pub const REPEAT: i32 = 2;
}

/// One raw event captured from a physical device on the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Device the event was read from.
    pub handle: HandleId,
    /// Event class (see [`event_type`]).
    pub event_type: u16,
    /// Key, axis, or button code within the class.
    pub code: u16,
    /// Key state, relative delta, or absolute position.
    pub value: i32,
    /// Capture time in microseconds since the Unix epoch.
    pub when_us: u64,
}

/// A key that is still held on a sink device when sharing stops.
///
/// The source injects these so that keys pressed at the moment of the stop
/// do not stay stuck down on its virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStateEntry {
    pub handle: HandleId,
    pub code: u16,
    pub value: i32,
}

/// Description of one physical device as reported by the hardware collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub handle: HandleId,
    pub name: String,
    /// Input classes this device produces.
    pub types: InputTypeMask,
}

/// Key combinations the sink keeps local even while sharing.
///
/// Each inner vector is one chord of key codes.  The list is sent to the
/// source in the prepare answer so the source can avoid forwarding those
/// chords back.
pub type AllowList = Vec<Vec<u32>>;
