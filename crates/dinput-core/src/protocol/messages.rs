//! All distributed-input protocol message types.
//!
//! Every message is a command code plus a set of named fields.  The command
//! code travels in the binary header; the fields travel as a JSON object in
//! the payload (see [`crate::protocol::codec`]).
//!
//! Messages fall into three groups by who sends them:
//!
//! - **Source → sink requests** (`Prepare`, `StartByType`, ...) and their
//!   relay-forwarded twins (`RelayedPrepare`, ...), which a relay node sends
//!   to a sink on behalf of a third node.
//! - **Sink → source answers** (`OnPrepared`, `OnStartedByHandles`, ...),
//!   the event stream (`InputEventBatch`, `KeyState`), and the `OnRelay*`
//!   answers that echo the relay token.
//! - **Source → source relay traffic** (`RelayPrepare`, ...) between the
//!   node that originates a relay request and the relay node, plus the
//!   matching `*Result` messages.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::event::{AllowList, InputEvent, KeyStateEntry};
use crate::domain::ids::{DeviceId, HandleId, InputTypeMask, RelayToken};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 28;

/// Status codes carried in the `status` field of every answer.
pub mod status {
    pub const OK: i32 = 0;
    pub const NOT_PREPARED: i32 = -1;
    pub const SWITCH_NOT_FOUND: i32 = -2;
    pub const ALREADY_PENDING: i32 = -3;
    pub const CHANNEL_OPEN_FAILED: i32 = -4;
    pub const SEND_FAILED: i32 = -5;
    pub const DISCONNECTED: i32 = -6;
    pub const CAPTURE_FAILED: i32 = -7;
}

// ── Command codes ─────────────────────────────────────────────────────────────

/// Which role's event loop handles a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Source,
    Sink,
}

/// All command codes defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CommandCode {
    // Source → sink (0x01–0x1F)
    Prepare = 0x01,
    Unprepare = 0x02,
    StartByType = 0x03,
    StopByType = 0x04,
    StartByHandles = 0x05,
    StopByHandles = 0x06,
    LatencyProbe = 0x07,
    // Relay node → sink (0x20–0x3F)
    RelayedPrepare = 0x20,
    RelayedUnprepare = 0x21,
    RelayedStartByType = 0x22,
    RelayedStopByType = 0x23,
    RelayedStartByHandles = 0x24,
    RelayedStopByHandles = 0x25,
    // Sink → source (0x40–0x5F)
    OnPrepared = 0x40,
    OnUnprepared = 0x41,
    OnStartedByType = 0x42,
    OnStoppedByType = 0x43,
    OnStartedByHandles = 0x44,
    OnStoppedByHandles = 0x45,
    KeyState = 0x46,
    KeyStateBatch = 0x47,
    InputEventBatch = 0x48,
    LatencyEcho = 0x49,
    // Sink → relay node (0x60–0x7F)
    OnRelayPrepared = 0x60,
    OnRelayUnprepared = 0x61,
    OnRelayStartedByType = 0x62,
    OnRelayStoppedByType = 0x63,
    OnRelayStartedByHandles = 0x64,
    OnRelayStoppedByHandles = 0x65,
    // Originator → relay node (0x80–0x8F)
    RelayPrepare = 0x80,
    RelayUnprepare = 0x81,
    RelayStartByType = 0x82,
    RelayStopByType = 0x83,
    RelayStartByHandles = 0x84,
    RelayStopByHandles = 0x85,
    // Relay node → originator (0x90–0x9F)
    RelayPrepareResult = 0x90,
    RelayUnprepareResult = 0x91,
    RelayStartByTypeResult = 0x92,
    RelayStopByTypeResult = 0x93,
    RelayStartByHandlesResult = 0x94,
    RelayStopByHandlesResult = 0x95,
}

impl CommandCode {
    /// Returns the role whose event loop consumes this command.
    pub fn role(self) -> Role {
        match self {
            CommandCode::Prepare
            | CommandCode::Unprepare
            | CommandCode::StartByType
            | CommandCode::StopByType
            | CommandCode::StartByHandles
            | CommandCode::StopByHandles
            | CommandCode::LatencyProbe
            | CommandCode::RelayedPrepare
            | CommandCode::RelayedUnprepare
            | CommandCode::RelayedStartByType
            | CommandCode::RelayedStopByType
            | CommandCode::RelayedStartByHandles
            | CommandCode::RelayedStopByHandles => Role::Sink,
            _ => Role::Source,
        }
    }
}

impl TryFrom<u32> for CommandCode {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0x01 => Ok(CommandCode::Prepare),
            0x02 => Ok(CommandCode::Unprepare),
            0x03 => Ok(CommandCode::StartByType),
            0x04 => Ok(CommandCode::StopByType),
            0x05 => Ok(CommandCode::StartByHandles),
            0x06 => Ok(CommandCode::StopByHandles),
            0x07 => Ok(CommandCode::LatencyProbe),
            0x20 => Ok(CommandCode::RelayedPrepare),
            0x21 => Ok(CommandCode::RelayedUnprepare),
            0x22 => Ok(CommandCode::RelayedStartByType),
            0x23 => Ok(CommandCode::RelayedStopByType),
            0x24 => Ok(CommandCode::RelayedStartByHandles),
            0x25 => Ok(CommandCode::RelayedStopByHandles),
            0x40 => Ok(CommandCode::OnPrepared),
            0x41 => Ok(CommandCode::OnUnprepared),
            0x42 => Ok(CommandCode::OnStartedByType),
            0x43 => Ok(CommandCode::OnStoppedByType),
            0x44 => Ok(CommandCode::OnStartedByHandles),
            0x45 => Ok(CommandCode::OnStoppedByHandles),
            0x46 => Ok(CommandCode::KeyState),
            0x47 => Ok(CommandCode::KeyStateBatch),
            0x48 => Ok(CommandCode::InputEventBatch),
            0x49 => Ok(CommandCode::LatencyEcho),
            0x60 => Ok(CommandCode::OnRelayPrepared),
            0x61 => Ok(CommandCode::OnRelayUnprepared),
            0x62 => Ok(CommandCode::OnRelayStartedByType),
            0x63 => Ok(CommandCode::OnRelayStoppedByType),
            0x64 => Ok(CommandCode::OnRelayStartedByHandles),
            0x65 => Ok(CommandCode::OnRelayStoppedByHandles),
            0x80 => Ok(CommandCode::RelayPrepare),
            0x81 => Ok(CommandCode::RelayUnprepare),
            0x82 => Ok(CommandCode::RelayStartByType),
            0x83 => Ok(CommandCode::RelayStopByType),
            0x84 => Ok(CommandCode::RelayStartByHandles),
            0x85 => Ok(CommandCode::RelayStopByHandles),
            0x90 => Ok(CommandCode::RelayPrepareResult),
            0x91 => Ok(CommandCode::RelayUnprepareResult),
            0x92 => Ok(CommandCode::RelayStartByTypeResult),
            0x93 => Ok(CommandCode::RelayStopByTypeResult),
            0x94 => Ok(CommandCode::RelayStartByHandlesResult),
            0x95 => Ok(CommandCode::RelayStopByHandlesResult),
            _ => Err(()),
        }
    }
}

// ── Common message header ─────────────────────────────────────────────────────

/// 28-byte header prepended to every message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Protocol version; always [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Identifies the payload fields.
    pub command: CommandCode,
    /// Length of the JSON payload in bytes (not including this header).
    pub payload_length: u32,
    /// Monotonically increasing per-channel counter.
    pub sequence_number: u64,
    /// Microseconds since Unix epoch at time of generation.
    pub timestamp_us: u64,
}

// ── Request payloads ──────────────────────────────────────────────────────────

/// PREPARE / UNPREPARE: session setup and teardown from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Network id of the requesting source.
    pub device_id: DeviceId,
}

/// START_BY_TYPE / STOP_BY_TYPE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRequest {
    pub device_id: DeviceId,
    pub input_types: InputTypeMask,
}

/// START_BY_HANDLES / STOP_BY_HANDLES.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRequest {
    pub device_id: DeviceId,
    pub handles: BTreeSet<HandleId>,
}

/// LATENCY_PROBE / LATENCY_ECHO.  The echo returns `sent_at_us` unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyMessage {
    pub device_id: DeviceId,
    pub sent_at_us: u64,
}

// ── Answer payloads ───────────────────────────────────────────────────────────

/// ON_PREPARED: answer to a prepare, with the sink's allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedReply {
    /// Network id of the answering sink.
    pub device_id: DeviceId,
    pub status: i32,
    pub allow_list: AllowList,
}

/// ON_UNPREPARED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpreparedReply {
    pub device_id: DeviceId,
    pub status: i32,
}

/// ON_STARTED_BY_TYPE / ON_STOPPED_BY_TYPE.
///
/// `requested` echoes the request and is the correlation key on the source;
/// `granted` is what the sink actually started or stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeReply {
    pub device_id: DeviceId,
    pub status: i32,
    pub requested: InputTypeMask,
    pub granted: InputTypeMask,
}

/// ON_STARTED_BY_HANDLES / ON_STOPPED_BY_HANDLES.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleReply {
    pub device_id: DeviceId,
    pub status: i32,
    pub requested: BTreeSet<HandleId>,
    pub granted: BTreeSet<HandleId>,
}

/// KEY_STATE_BATCH: keys still held on handles that just stopped sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStateBatch {
    pub device_id: DeviceId,
    pub entries: Vec<KeyStateEntry>,
}

/// INPUT_EVENT_BATCH: captured events of through-out handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEventBatch {
    pub device_id: DeviceId,
    pub events: Vec<InputEvent>,
}

// ── Relay payloads ────────────────────────────────────────────────────────────

/// RELAY_PREPARE / RELAY_UNPREPARE: ask `src_id` to (un)prepare `sink_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTarget {
    /// Network id of the originating node.
    pub device_id: DeviceId,
    pub src_id: DeviceId,
    pub sink_id: DeviceId,
}

/// RELAY_START_BY_TYPE / RELAY_STOP_BY_TYPE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTypeRequest {
    pub device_id: DeviceId,
    pub src_id: DeviceId,
    pub sink_id: DeviceId,
    pub input_types: InputTypeMask,
}

/// RELAY_START_BY_HANDLES / RELAY_STOP_BY_HANDLES.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHandleRequest {
    pub device_id: DeviceId,
    pub src_id: DeviceId,
    pub sink_id: DeviceId,
    pub handles: BTreeSet<HandleId>,
}

/// RELAY_PREPARE_RESULT / RELAY_UNPREPARE_RESULT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResult {
    pub src_id: DeviceId,
    pub sink_id: DeviceId,
    pub status: i32,
}

/// RELAY_START/STOP_BY_TYPE_RESULT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTypeResult {
    pub src_id: DeviceId,
    pub sink_id: DeviceId,
    pub status: i32,
    pub requested: InputTypeMask,
    pub granted: InputTypeMask,
}

/// RELAY_START/STOP_BY_HANDLES_RESULT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHandleResult {
    pub src_id: DeviceId,
    pub sink_id: DeviceId,
    pub status: i32,
    pub requested: BTreeSet<HandleId>,
    pub granted: BTreeSet<HandleId>,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid distributed-input messages, discriminated by command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DInputMessage {
    Prepare(SessionRequest),
    Unprepare(SessionRequest),
    StartByType(TypeRequest),
    StopByType(TypeRequest),
    StartByHandles(HandleRequest),
    StopByHandles(HandleRequest),
    LatencyProbe(LatencyMessage),

    RelayedPrepare { token: RelayToken, request: SessionRequest },
    RelayedUnprepare { token: RelayToken, request: SessionRequest },
    RelayedStartByType { token: RelayToken, request: TypeRequest },
    RelayedStopByType { token: RelayToken, request: TypeRequest },
    RelayedStartByHandles { token: RelayToken, request: HandleRequest },
    RelayedStopByHandles { token: RelayToken, request: HandleRequest },

    OnPrepared(PreparedReply),
    OnUnprepared(UnpreparedReply),
    OnStartedByType(TypeReply),
    OnStoppedByType(TypeReply),
    OnStartedByHandles(HandleReply),
    OnStoppedByHandles(HandleReply),
    KeyState { device_id: DeviceId, entry: KeyStateEntry },
    KeyStateBatch(KeyStateBatch),
    InputEventBatch(InputEventBatch),
    LatencyEcho(LatencyMessage),

    OnRelayPrepared { token: RelayToken, reply: PreparedReply },
    OnRelayUnprepared { token: RelayToken, reply: UnpreparedReply },
    OnRelayStartedByType { token: RelayToken, reply: TypeReply },
    OnRelayStoppedByType { token: RelayToken, reply: TypeReply },
    OnRelayStartedByHandles { token: RelayToken, reply: HandleReply },
    OnRelayStoppedByHandles { token: RelayToken, reply: HandleReply },

    RelayPrepare(RelayTarget),
    RelayUnprepare(RelayTarget),
    RelayStartByType(RelayTypeRequest),
    RelayStopByType(RelayTypeRequest),
    RelayStartByHandles(RelayHandleRequest),
    RelayStopByHandles(RelayHandleRequest),

    RelayPrepareResult(RelayResult),
    RelayUnprepareResult(RelayResult),
    RelayStartByTypeResult(RelayTypeResult),
    RelayStopByTypeResult(RelayTypeResult),
    RelayStartByHandlesResult(RelayHandleResult),
    RelayStopByHandlesResult(RelayHandleResult),
}

impl DInputMessage {
    /// Returns the [`CommandCode`] discriminant for this message.
    pub fn command(&self) -> CommandCode {
        match self {
            DInputMessage::Prepare(_) => CommandCode::Prepare,
            DInputMessage::Unprepare(_) => CommandCode::Unprepare,
            DInputMessage::StartByType(_) => CommandCode::StartByType,
            DInputMessage::StopByType(_) => CommandCode::StopByType,
            DInputMessage::StartByHandles(_) => CommandCode::StartByHandles,
            DInputMessage::StopByHandles(_) => CommandCode::StopByHandles,
            DInputMessage::LatencyProbe(_) => CommandCode::LatencyProbe,
            DInputMessage::RelayedPrepare { .. } => CommandCode::RelayedPrepare,
            DInputMessage::RelayedUnprepare { .. } => CommandCode::RelayedUnprepare,
            DInputMessage::RelayedStartByType { .. } => CommandCode::RelayedStartByType,
            DInputMessage::RelayedStopByType { .. } => CommandCode::RelayedStopByType,
            DInputMessage::RelayedStartByHandles { .. } => CommandCode::RelayedStartByHandles,
            DInputMessage::RelayedStopByHandles { .. } => CommandCode::RelayedStopByHandles,
            DInputMessage::OnPrepared(_) => CommandCode::OnPrepared,
            DInputMessage::OnUnprepared(_) => CommandCode::OnUnprepared,
            DInputMessage::OnStartedByType(_) => CommandCode::OnStartedByType,
            DInputMessage::OnStoppedByType(_) => CommandCode::OnStoppedByType,
            DInputMessage::OnStartedByHandles(_) => CommandCode::OnStartedByHandles,
            DInputMessage::OnStoppedByHandles(_) => CommandCode::OnStoppedByHandles,
            DInputMessage::KeyState { .. } => CommandCode::KeyState,
            DInputMessage::KeyStateBatch(_) => CommandCode::KeyStateBatch,
            DInputMessage::InputEventBatch(_) => CommandCode::InputEventBatch,
            DInputMessage::LatencyEcho(_) => CommandCode::LatencyEcho,
            DInputMessage::OnRelayPrepared { .. } => CommandCode::OnRelayPrepared,
            DInputMessage::OnRelayUnprepared { .. } => CommandCode::OnRelayUnprepared,
            DInputMessage::OnRelayStartedByType { .. } => CommandCode::OnRelayStartedByType,
            DInputMessage::OnRelayStoppedByType { .. } => CommandCode::OnRelayStoppedByType,
            DInputMessage::OnRelayStartedByHandles { .. } => CommandCode::OnRelayStartedByHandles,
            DInputMessage::OnRelayStoppedByHandles { .. } => CommandCode::OnRelayStoppedByHandles,
            DInputMessage::RelayPrepare(_) => CommandCode::RelayPrepare,
            DInputMessage::RelayUnprepare(_) => CommandCode::RelayUnprepare,
            DInputMessage::RelayStartByType(_) => CommandCode::RelayStartByType,
            DInputMessage::RelayStopByType(_) => CommandCode::RelayStopByType,
            DInputMessage::RelayStartByHandles(_) => CommandCode::RelayStartByHandles,
            DInputMessage::RelayStopByHandles(_) => CommandCode::RelayStopByHandles,
            DInputMessage::RelayPrepareResult(_) => CommandCode::RelayPrepareResult,
            DInputMessage::RelayUnprepareResult(_) => CommandCode::RelayUnprepareResult,
            DInputMessage::RelayStartByTypeResult(_) => CommandCode::RelayStartByTypeResult,
            DInputMessage::RelayStopByTypeResult(_) => CommandCode::RelayStopByTypeResult,
            DInputMessage::RelayStartByHandlesResult(_) => CommandCode::RelayStartByHandlesResult,
            DInputMessage::RelayStopByHandlesResult(_) => CommandCode::RelayStopByHandlesResult,
        }
    }

    /// Returns the role whose event loop consumes this message.
    pub fn role(&self) -> Role {
        self.command().role()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_code_round_trips_through_u32() {
        for raw in 0u32..=0xFF {
            if let Ok(code) = CommandCode::try_from(raw) {
                assert_eq!(code as u32, raw);
            }
        }
    }

    #[test]
    fn test_unknown_command_code_is_rejected() {
        assert!(CommandCode::try_from(0x00).is_err());
        assert!(CommandCode::try_from(0xFFFF).is_err());
    }

    #[test]
    fn test_requests_route_to_sink_and_answers_to_source() {
        assert_eq!(CommandCode::Prepare.role(), Role::Sink);
        assert_eq!(CommandCode::RelayedStopByHandles.role(), Role::Sink);
        assert_eq!(CommandCode::OnPrepared.role(), Role::Source);
        assert_eq!(CommandCode::RelayPrepare.role(), Role::Source);
        assert_eq!(CommandCode::RelayStopByTypeResult.role(), Role::Source);
    }
}
