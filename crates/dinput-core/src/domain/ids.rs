//! Identifier newtypes and the input-type bitmask.
//!
//! Every identifier that crosses a component boundary is wrapped in its own
//! type so that, for example, a device handle can never be passed where a
//! peer device id is expected.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

/// Network identity of a peer node, as understood by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a raw network identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stable identifier of one physical input device instance on a sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(String);

impl HandleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HandleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Handle of one open channel to a peer.
///
/// Allocated by the transport; unique per transport endpoint for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Single-use correlation token minted by a relay node.
///
/// Travels to the sink inside a forwarded request and comes back unchanged
/// in the sink's `OnRelay*` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayToken(pub u64);

impl fmt::Display for RelayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay#{}", self.0)
    }
}

/// Bitmask of input device classes.
///
/// Bit layout:
/// - Bit 0: mouse
/// - Bit 1: keyboard
/// - Bit 2: touchpad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputTypeMask(pub u32);

impl InputTypeMask {
    pub const NONE: InputTypeMask = InputTypeMask(0);
    pub const MOUSE: InputTypeMask = InputTypeMask(1 << 0);
    pub const KEYBOARD: InputTypeMask = InputTypeMask(1 << 1);
    pub const TOUCHPAD: InputTypeMask = InputTypeMask(1 << 2);
    pub const ALL: InputTypeMask = InputTypeMask(0b111);

    /// Returns the raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when no class bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when every bit of `other` is also set in `self`.
    pub fn contains(self, other: InputTypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when `self` and `other` share at least one bit.
    pub fn intersects(self, other: InputTypeMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Clears every bit of `other` (AND-NOT).
    pub fn without(self, other: InputTypeMask) -> InputTypeMask {
        InputTypeMask(self.0 & !other.0)
    }
}

impl BitOr for InputTypeMask {
    type Output = InputTypeMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        InputTypeMask(self.0 | rhs.0)
    }
}

impl BitAnd for InputTypeMask {
    type Output = InputTypeMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        InputTypeMask(self.0 & rhs.0)
    }
}

impl fmt::Display for InputTypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut names = Vec::new();
        if self.intersects(Self::MOUSE) {
            names.push("mouse");
        }
        if self.intersects(Self::KEYBOARD) {
            names.push("keyboard");
        }
        if self.intersects(Self::TOUCHPAD) {
            names.push("touchpad");
        }
        let unknown = self.without(Self::ALL);
        if !unknown.is_empty() {
            return write!(f, "{}|0x{:X}", names.join("|"), unknown.0);
        }
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_union_and_without_are_inverse_for_disjoint_bits() {
        let mask = InputTypeMask::MOUSE | InputTypeMask::KEYBOARD;
        assert_eq!(mask.without(InputTypeMask::MOUSE), InputTypeMask::KEYBOARD);
        assert!(mask.contains(InputTypeMask::KEYBOARD));
        assert!(!mask.contains(InputTypeMask::TOUCHPAD));
    }

    #[test]
    fn test_mask_without_ignores_bits_not_set() {
        let mask = InputTypeMask::KEYBOARD;
        assert_eq!(mask.without(InputTypeMask::TOUCHPAD), InputTypeMask::KEYBOARD);
    }

    #[test]
    fn test_mask_display_lists_class_names() {
        assert_eq!(InputTypeMask::NONE.to_string(), "none");
        assert_eq!(
            (InputTypeMask::MOUSE | InputTypeMask::TOUCHPAD).to_string(),
            "mouse|touchpad"
        );
        assert_eq!(InputTypeMask(0b1001).to_string(), "mouse|0x8");
    }

    #[test]
    fn test_ids_display_raw_value() {
        assert_eq!(DeviceId::from("net-1").to_string(), "net-1");
        assert_eq!(HandleId::from("H1").to_string(), "H1");
        assert_eq!(SessionId(7).to_string(), "session#7");
        assert_eq!(RelayToken(3).to_string(), "relay#3");
    }
}
