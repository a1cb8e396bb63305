//! Codec for encoding and decoding distributed-input protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][reserved:3][command:4][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 28 bytes. All multi-byte integers are big-endian.
//! The payload is a UTF-8 JSON object holding the message fields, e.g.
//!
//! ```json
//! {"deviceId":"net-a","inputTypes":3}
//! ```
//!
//! # Field validation
//!
//! A message is only produced once *every* field it needs has been read and
//! type-checked.  A missing field, or a field of the wrong JSON type (a
//! string where a number is expected, a negative number for an unsigned
//! field, ...), fails the whole message with
//! [`ParseError::MissingOrWrongTypeField`] naming the offending field.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::event::{AllowList, InputEvent, KeyStateEntry};
use crate::domain::ids::{DeviceId, HandleId, InputTypeMask, RelayToken};
use crate::protocol::messages::{
    CommandCode, DInputMessage, HandleReply, HandleRequest, InputEventBatch, KeyStateBatch,
    LatencyMessage, MessageHeader, PreparedReply, RelayHandleRequest, RelayHandleResult,
    RelayResult, RelayTarget, RelayTypeRequest, RelayTypeResult, SessionRequest, TypeReply,
    TypeRequest, UnpreparedReply, HEADER_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The command code in the header is not a recognized value.
    #[error("unknown command code: 0x{0:02X}")]
    UnknownCommand(u32),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The payload is not a parseable JSON object.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A required field is absent or has the wrong type.
    #[error("missing or mistyped field `{0}`")]
    MissingOrWrongTypeField(&'static str),
}

/// JSON field names used in payloads.
pub mod fields {
    pub const DEVICE_ID: &str = "deviceId";
    pub const SRC_ID: &str = "srcId";
    pub const SINK_ID: &str = "sinkId";
    pub const RELAY_SESSION_ID: &str = "relaySessionId";
    pub const STATUS: &str = "status";
    pub const INPUT_TYPES: &str = "inputTypes";
    pub const GRANTED_TYPES: &str = "grantedTypes";
    pub const HANDLE_IDS: &str = "handleIds";
    pub const GRANTED_HANDLE_IDS: &str = "grantedHandleIds";
    pub const ALLOW_LIST: &str = "allowList";
    pub const SENT_AT_US: &str = "sentAtUs";
    pub const EVENTS: &str = "events";
    pub const KEY_STATES: &str = "keyStates";
    pub const HANDLE_ID: &str = "handleId";
    pub const EVENT_TYPE: &str = "type";
    pub const CODE: &str = "code";
    pub const VALUE: &str = "value";
    pub const WHEN_US: &str = "whenUs";
}

use fields::*;

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`DInputMessage`] into a byte vector including the 28-byte header.
///
/// The sequence number is **not** set by this function – pass a pre-incremented
/// value from a [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] if the payload cannot be serialized.
///
/// # Examples
///
/// ```rust
/// use dinput_core::protocol::{encode_message, decode_message};
/// use dinput_core::protocol::messages::{DInputMessage, SessionRequest};
///
/// let msg = DInputMessage::Prepare(SessionRequest { device_id: "net-a".into() });
/// let bytes = encode_message(&msg, 0, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &DInputMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ParseError> {
    let payload = serde_json::to_vec(&Value::Object(encode_fields(msg)))
        .map_err(|e| ParseError::Malformed(e.to_string()))?;
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    // Header: version (1) + reserved (3) + command (4) + payload_len (4) +
    //         seq (8) + timestamp_us (8) = 28 bytes
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&[0x00, 0x00, 0x00]); // reserved
    buf.extend_from_slice(&(msg.command() as u32).to_be_bytes());
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`DInputMessage`] using the current system time as the timestamp.
///
/// # Errors
///
/// Returns [`ParseError`] if serialization fails.
pub fn encode_message_now(
    msg: &DInputMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ParseError> {
    encode_message(msg, sequence_number, now_us())
}

/// Decodes only the 28-byte header at the start of `bytes`.
///
/// Stream transports call this to learn how many payload bytes to wait for
/// before handing the complete frame to [`decode_message`].
///
/// # Errors
///
/// Returns [`ParseError`] for short input, a bad version, or an unknown command.
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, ParseError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ParseError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }

    // bytes[1..4] are reserved – ignored on decode

    let raw_command = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let command =
        CommandCode::try_from(raw_command).map_err(|_| ParseError::UnknownCommand(raw_command))?;
    let payload_length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let sequence_number = read_be_u64(&bytes[12..20]);
    let timestamp_us = read_be_u64(&bytes[20..28]);

    Ok(MessageHeader {
        version,
        command,
        payload_length,
        sequence_number,
        timestamp_us,
    })
}

/// Total size in bytes (header + payload) of the frame whose header starts
/// `bytes`.
///
/// Unlike [`decode_header`] this does not look at the command code, so a
/// stream reader can skip over a frame it will later reject as unknown
/// without losing its place in the stream.
///
/// # Errors
///
/// Returns [`ParseError`] for short input or a bad version.
pub fn frame_length(bytes: &[u8]) -> Result<usize, ParseError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ParseError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(ParseError::UnsupportedVersion(bytes[0]));
    }
    let payload_length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Ok(HEADER_SIZE + payload_length as usize)
}

/// Decodes one [`DInputMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ParseError`] if the frame or any of its fields is invalid.
pub fn decode_message(bytes: &[u8]) -> Result<(DInputMessage, usize), ParseError> {
    let header = decode_header(bytes)?;
    let payload_len = header.payload_length as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ParseError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ParseError::Malformed("payload is not a JSON object".to_string()));
    };

    let msg = decode_fields(header.command, &FieldReader::new(&map))?;
    tracing::trace!(command = ?header.command, seq = header.sequence_number, "decoded message");
    Ok((msg, total_needed))
}

/// Microseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn read_be_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_fields(msg: &DInputMessage) -> Map<String, Value> {
    let mut w = FieldWriter::default();
    match msg {
        DInputMessage::Prepare(m) | DInputMessage::Unprepare(m) => write_session_request(&mut w, m),
        DInputMessage::StartByType(m) | DInputMessage::StopByType(m) => {
            write_type_request(&mut w, m)
        }
        DInputMessage::StartByHandles(m) | DInputMessage::StopByHandles(m) => {
            write_handle_request(&mut w, m)
        }
        DInputMessage::LatencyProbe(m) | DInputMessage::LatencyEcho(m) => {
            w.device(DEVICE_ID, &m.device_id);
            w.u64(SENT_AT_US, m.sent_at_us);
        }
        DInputMessage::RelayedPrepare { token, request }
        | DInputMessage::RelayedUnprepare { token, request } => {
            w.token(*token);
            write_session_request(&mut w, request);
        }
        DInputMessage::RelayedStartByType { token, request }
        | DInputMessage::RelayedStopByType { token, request } => {
            w.token(*token);
            write_type_request(&mut w, request);
        }
        DInputMessage::RelayedStartByHandles { token, request }
        | DInputMessage::RelayedStopByHandles { token, request } => {
            w.token(*token);
            write_handle_request(&mut w, request);
        }
        DInputMessage::OnPrepared(m) => write_prepared_reply(&mut w, m),
        DInputMessage::OnUnprepared(m) => write_unprepared_reply(&mut w, m),
        DInputMessage::OnStartedByType(m) | DInputMessage::OnStoppedByType(m) => {
            write_type_reply(&mut w, m)
        }
        DInputMessage::OnStartedByHandles(m) | DInputMessage::OnStoppedByHandles(m) => {
            write_handle_reply(&mut w, m)
        }
        DInputMessage::KeyState { device_id, entry } => {
            w.device(DEVICE_ID, device_id);
            w.handle(HANDLE_ID, &entry.handle);
            w.u64(CODE, u64::from(entry.code));
            w.i64(VALUE, i64::from(entry.value));
        }
        DInputMessage::KeyStateBatch(m) => {
            w.device(DEVICE_ID, &m.device_id);
            w.key_states(KEY_STATES, &m.entries);
        }
        DInputMessage::InputEventBatch(m) => {
            w.device(DEVICE_ID, &m.device_id);
            w.events(EVENTS, &m.events);
        }
        DInputMessage::OnRelayPrepared { token, reply } => {
            w.token(*token);
            write_prepared_reply(&mut w, reply);
        }
        DInputMessage::OnRelayUnprepared { token, reply } => {
            w.token(*token);
            write_unprepared_reply(&mut w, reply);
        }
        DInputMessage::OnRelayStartedByType { token, reply }
        | DInputMessage::OnRelayStoppedByType { token, reply } => {
            w.token(*token);
            write_type_reply(&mut w, reply);
        }
        DInputMessage::OnRelayStartedByHandles { token, reply }
        | DInputMessage::OnRelayStoppedByHandles { token, reply } => {
            w.token(*token);
            write_handle_reply(&mut w, reply);
        }
        DInputMessage::RelayPrepare(m) | DInputMessage::RelayUnprepare(m) => {
            w.device(DEVICE_ID, &m.device_id);
            w.device(SRC_ID, &m.src_id);
            w.device(SINK_ID, &m.sink_id);
        }
        DInputMessage::RelayStartByType(m) | DInputMessage::RelayStopByType(m) => {
            w.device(DEVICE_ID, &m.device_id);
            w.device(SRC_ID, &m.src_id);
            w.device(SINK_ID, &m.sink_id);
            w.u64(INPUT_TYPES, u64::from(m.input_types.bits()));
        }
        DInputMessage::RelayStartByHandles(m) | DInputMessage::RelayStopByHandles(m) => {
            w.device(DEVICE_ID, &m.device_id);
            w.device(SRC_ID, &m.src_id);
            w.device(SINK_ID, &m.sink_id);
            w.handles(HANDLE_IDS, &m.handles);
        }
        DInputMessage::RelayPrepareResult(m) | DInputMessage::RelayUnprepareResult(m) => {
            w.device(SRC_ID, &m.src_id);
            w.device(SINK_ID, &m.sink_id);
            w.i64(STATUS, i64::from(m.status));
        }
        DInputMessage::RelayStartByTypeResult(m) | DInputMessage::RelayStopByTypeResult(m) => {
            w.device(SRC_ID, &m.src_id);
            w.device(SINK_ID, &m.sink_id);
            w.i64(STATUS, i64::from(m.status));
            w.u64(INPUT_TYPES, u64::from(m.requested.bits()));
            w.u64(GRANTED_TYPES, u64::from(m.granted.bits()));
        }
        DInputMessage::RelayStartByHandlesResult(m)
        | DInputMessage::RelayStopByHandlesResult(m) => {
            w.device(SRC_ID, &m.src_id);
            w.device(SINK_ID, &m.sink_id);
            w.i64(STATUS, i64::from(m.status));
            w.handles(HANDLE_IDS, &m.requested);
            w.handles(GRANTED_HANDLE_IDS, &m.granted);
        }
    }
    w.map
}

fn write_session_request(w: &mut FieldWriter, m: &SessionRequest) {
    w.device(DEVICE_ID, &m.device_id);
}

fn write_type_request(w: &mut FieldWriter, m: &TypeRequest) {
    w.device(DEVICE_ID, &m.device_id);
    w.u64(INPUT_TYPES, u64::from(m.input_types.bits()));
}

fn write_handle_request(w: &mut FieldWriter, m: &HandleRequest) {
    w.device(DEVICE_ID, &m.device_id);
    w.handles(HANDLE_IDS, &m.handles);
}

fn write_prepared_reply(w: &mut FieldWriter, m: &PreparedReply) {
    w.device(DEVICE_ID, &m.device_id);
    w.i64(STATUS, i64::from(m.status));
    w.allow_list(ALLOW_LIST, &m.allow_list);
}

fn write_unprepared_reply(w: &mut FieldWriter, m: &UnpreparedReply) {
    w.device(DEVICE_ID, &m.device_id);
    w.i64(STATUS, i64::from(m.status));
}

fn write_type_reply(w: &mut FieldWriter, m: &TypeReply) {
    w.device(DEVICE_ID, &m.device_id);
    w.i64(STATUS, i64::from(m.status));
    w.u64(INPUT_TYPES, u64::from(m.requested.bits()));
    w.u64(GRANTED_TYPES, u64::from(m.granted.bits()));
}

fn write_handle_reply(w: &mut FieldWriter, m: &HandleReply) {
    w.device(DEVICE_ID, &m.device_id);
    w.i64(STATUS, i64::from(m.status));
    w.handles(HANDLE_IDS, &m.requested);
    w.handles(GRANTED_HANDLE_IDS, &m.granted);
}

/// Accumulates JSON fields for one payload.
#[derive(Default)]
struct FieldWriter {
    map: Map<String, Value>,
}

impl FieldWriter {
    fn device(&mut self, name: &str, id: &DeviceId) {
        self.map.insert(name.to_string(), Value::from(id.as_str()));
    }

    fn handle(&mut self, name: &str, id: &HandleId) {
        self.map.insert(name.to_string(), Value::from(id.as_str()));
    }

    fn token(&mut self, token: RelayToken) {
        self.u64(RELAY_SESSION_ID, token.0);
    }

    fn u64(&mut self, name: &str, v: u64) {
        self.map.insert(name.to_string(), Value::from(v));
    }

    fn i64(&mut self, name: &str, v: i64) {
        self.map.insert(name.to_string(), Value::from(v));
    }

    fn handles(&mut self, name: &str, handles: &BTreeSet<HandleId>) {
        let list = handles.iter().map(|h| Value::from(h.as_str())).collect();
        self.map.insert(name.to_string(), Value::Array(list));
    }

    fn allow_list(&mut self, name: &str, list: &AllowList) {
        let chords = list
            .iter()
            .map(|chord| Value::Array(chord.iter().map(|c| Value::from(*c)).collect()))
            .collect();
        self.map.insert(name.to_string(), Value::Array(chords));
    }

    fn events(&mut self, name: &str, events: &[InputEvent]) {
        let list = events
            .iter()
            .map(|e| {
                let mut obj = Map::new();
                obj.insert(HANDLE_ID.to_string(), Value::from(e.handle.as_str()));
                obj.insert(EVENT_TYPE.to_string(), Value::from(e.event_type));
                obj.insert(CODE.to_string(), Value::from(e.code));
                obj.insert(VALUE.to_string(), Value::from(e.value));
                obj.insert(WHEN_US.to_string(), Value::from(e.when_us));
                Value::Object(obj)
            })
            .collect();
        self.map.insert(name.to_string(), Value::Array(list));
    }

    fn key_states(&mut self, name: &str, entries: &[KeyStateEntry]) {
        let list = entries
            .iter()
            .map(|k| {
                let mut obj = Map::new();
                obj.insert(HANDLE_ID.to_string(), Value::from(k.handle.as_str()));
                obj.insert(CODE.to_string(), Value::from(k.code));
                obj.insert(VALUE.to_string(), Value::from(k.value));
                Value::Object(obj)
            })
            .collect();
        self.map.insert(name.to_string(), Value::Array(list));
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_fields(command: CommandCode, r: &FieldReader<'_>) -> Result<DInputMessage, ParseError> {
    let msg = match command {
        CommandCode::Prepare => DInputMessage::Prepare(read_session_request(r)?),
        CommandCode::Unprepare => DInputMessage::Unprepare(read_session_request(r)?),
        CommandCode::StartByType => DInputMessage::StartByType(read_type_request(r)?),
        CommandCode::StopByType => DInputMessage::StopByType(read_type_request(r)?),
        CommandCode::StartByHandles => DInputMessage::StartByHandles(read_handle_request(r)?),
        CommandCode::StopByHandles => DInputMessage::StopByHandles(read_handle_request(r)?),
        CommandCode::LatencyProbe => DInputMessage::LatencyProbe(read_latency(r)?),
        CommandCode::RelayedPrepare => DInputMessage::RelayedPrepare {
            token: r.token()?,
            request: read_session_request(r)?,
        },
        CommandCode::RelayedUnprepare => DInputMessage::RelayedUnprepare {
            token: r.token()?,
            request: read_session_request(r)?,
        },
        CommandCode::RelayedStartByType => DInputMessage::RelayedStartByType {
            token: r.token()?,
            request: read_type_request(r)?,
        },
        CommandCode::RelayedStopByType => DInputMessage::RelayedStopByType {
            token: r.token()?,
            request: read_type_request(r)?,
        },
        CommandCode::RelayedStartByHandles => DInputMessage::RelayedStartByHandles {
            token: r.token()?,
            request: read_handle_request(r)?,
        },
        CommandCode::RelayedStopByHandles => DInputMessage::RelayedStopByHandles {
            token: r.token()?,
            request: read_handle_request(r)?,
        },
        CommandCode::OnPrepared => DInputMessage::OnPrepared(read_prepared_reply(r)?),
        CommandCode::OnUnprepared => DInputMessage::OnUnprepared(read_unprepared_reply(r)?),
        CommandCode::OnStartedByType => DInputMessage::OnStartedByType(read_type_reply(r)?),
        CommandCode::OnStoppedByType => DInputMessage::OnStoppedByType(read_type_reply(r)?),
        CommandCode::OnStartedByHandles => {
            DInputMessage::OnStartedByHandles(read_handle_reply(r)?)
        }
        CommandCode::OnStoppedByHandles => {
            DInputMessage::OnStoppedByHandles(read_handle_reply(r)?)
        }
        CommandCode::KeyState => DInputMessage::KeyState {
            device_id: r.device(DEVICE_ID)?,
            entry: KeyStateEntry {
                handle: r.handle(HANDLE_ID)?,
                code: r.u16(CODE)?,
                value: r.i32(VALUE)?,
            },
        },
        CommandCode::KeyStateBatch => DInputMessage::KeyStateBatch(KeyStateBatch {
            device_id: r.device(DEVICE_ID)?,
            entries: r.key_states(KEY_STATES)?,
        }),
        CommandCode::InputEventBatch => DInputMessage::InputEventBatch(InputEventBatch {
            device_id: r.device(DEVICE_ID)?,
            events: r.events(EVENTS)?,
        }),
        CommandCode::LatencyEcho => DInputMessage::LatencyEcho(read_latency(r)?),
        CommandCode::OnRelayPrepared => DInputMessage::OnRelayPrepared {
            token: r.token()?,
            reply: read_prepared_reply(r)?,
        },
        CommandCode::OnRelayUnprepared => DInputMessage::OnRelayUnprepared {
            token: r.token()?,
            reply: read_unprepared_reply(r)?,
        },
        CommandCode::OnRelayStartedByType => DInputMessage::OnRelayStartedByType {
            token: r.token()?,
            reply: read_type_reply(r)?,
        },
        CommandCode::OnRelayStoppedByType => DInputMessage::OnRelayStoppedByType {
            token: r.token()?,
            reply: read_type_reply(r)?,
        },
        CommandCode::OnRelayStartedByHandles => DInputMessage::OnRelayStartedByHandles {
            token: r.token()?,
            reply: read_handle_reply(r)?,
        },
        CommandCode::OnRelayStoppedByHandles => DInputMessage::OnRelayStoppedByHandles {
            token: r.token()?,
            reply: read_handle_reply(r)?,
        },
        CommandCode::RelayPrepare => DInputMessage::RelayPrepare(read_relay_target(r)?),
        CommandCode::RelayUnprepare => DInputMessage::RelayUnprepare(read_relay_target(r)?),
        CommandCode::RelayStartByType => {
            DInputMessage::RelayStartByType(read_relay_type_request(r)?)
        }
        CommandCode::RelayStopByType => DInputMessage::RelayStopByType(read_relay_type_request(r)?),
        CommandCode::RelayStartByHandles => {
            DInputMessage::RelayStartByHandles(read_relay_handle_request(r)?)
        }
        CommandCode::RelayStopByHandles => {
            DInputMessage::RelayStopByHandles(read_relay_handle_request(r)?)
        }
        CommandCode::RelayPrepareResult => DInputMessage::RelayPrepareResult(read_relay_result(r)?),
        CommandCode::RelayUnprepareResult => {
            DInputMessage::RelayUnprepareResult(read_relay_result(r)?)
        }
        CommandCode::RelayStartByTypeResult => {
            DInputMessage::RelayStartByTypeResult(read_relay_type_result(r)?)
        }
        CommandCode::RelayStopByTypeResult => {
            DInputMessage::RelayStopByTypeResult(read_relay_type_result(r)?)
        }
        CommandCode::RelayStartByHandlesResult => {
            DInputMessage::RelayStartByHandlesResult(read_relay_handle_result(r)?)
        }
        CommandCode::RelayStopByHandlesResult => {
            DInputMessage::RelayStopByHandlesResult(read_relay_handle_result(r)?)
        }
    };
    Ok(msg)
}

fn read_session_request(r: &FieldReader<'_>) -> Result<SessionRequest, ParseError> {
    Ok(SessionRequest {
        device_id: r.device(DEVICE_ID)?,
    })
}

fn read_type_request(r: &FieldReader<'_>) -> Result<TypeRequest, ParseError> {
    Ok(TypeRequest {
        device_id: r.device(DEVICE_ID)?,
        input_types: r.mask(INPUT_TYPES)?,
    })
}

fn read_handle_request(r: &FieldReader<'_>) -> Result<HandleRequest, ParseError> {
    Ok(HandleRequest {
        device_id: r.device(DEVICE_ID)?,
        handles: r.handles(HANDLE_IDS)?,
    })
}

fn read_latency(r: &FieldReader<'_>) -> Result<LatencyMessage, ParseError> {
    Ok(LatencyMessage {
        device_id: r.device(DEVICE_ID)?,
        sent_at_us: r.u64(SENT_AT_US)?,
    })
}

fn read_prepared_reply(r: &FieldReader<'_>) -> Result<PreparedReply, ParseError> {
    Ok(PreparedReply {
        device_id: r.device(DEVICE_ID)?,
        status: r.i32(STATUS)?,
        allow_list: r.allow_list(ALLOW_LIST)?,
    })
}

fn read_unprepared_reply(r: &FieldReader<'_>) -> Result<UnpreparedReply, ParseError> {
    Ok(UnpreparedReply {
        device_id: r.device(DEVICE_ID)?,
        status: r.i32(STATUS)?,
    })
}

fn read_type_reply(r: &FieldReader<'_>) -> Result<TypeReply, ParseError> {
    Ok(TypeReply {
        device_id: r.device(DEVICE_ID)?,
        status: r.i32(STATUS)?,
        requested: r.mask(INPUT_TYPES)?,
        granted: r.mask(GRANTED_TYPES)?,
    })
}

fn read_handle_reply(r: &FieldReader<'_>) -> Result<HandleReply, ParseError> {
    Ok(HandleReply {
        device_id: r.device(DEVICE_ID)?,
        status: r.i32(STATUS)?,
        requested: r.handles(HANDLE_IDS)?,
        granted: r.handles(GRANTED_HANDLE_IDS)?,
    })
}

fn read_relay_target(r: &FieldReader<'_>) -> Result<RelayTarget, ParseError> {
    Ok(RelayTarget {
        device_id: r.device(DEVICE_ID)?,
        src_id: r.device(SRC_ID)?,
        sink_id: r.device(SINK_ID)?,
    })
}

fn read_relay_type_request(r: &FieldReader<'_>) -> Result<RelayTypeRequest, ParseError> {
    Ok(RelayTypeRequest {
        device_id: r.device(DEVICE_ID)?,
        src_id: r.device(SRC_ID)?,
        sink_id: r.device(SINK_ID)?,
        input_types: r.mask(INPUT_TYPES)?,
    })
}

fn read_relay_handle_request(r: &FieldReader<'_>) -> Result<RelayHandleRequest, ParseError> {
    Ok(RelayHandleRequest {
        device_id: r.device(DEVICE_ID)?,
        src_id: r.device(SRC_ID)?,
        sink_id: r.device(SINK_ID)?,
        handles: r.handles(HANDLE_IDS)?,
    })
}

fn read_relay_result(r: &FieldReader<'_>) -> Result<RelayResult, ParseError> {
    Ok(RelayResult {
        src_id: r.device(SRC_ID)?,
        sink_id: r.device(SINK_ID)?,
        status: r.i32(STATUS)?,
    })
}

fn read_relay_type_result(r: &FieldReader<'_>) -> Result<RelayTypeResult, ParseError> {
    Ok(RelayTypeResult {
        src_id: r.device(SRC_ID)?,
        sink_id: r.device(SINK_ID)?,
        status: r.i32(STATUS)?,
        requested: r.mask(INPUT_TYPES)?,
        granted: r.mask(GRANTED_TYPES)?,
    })
}

fn read_relay_handle_result(r: &FieldReader<'_>) -> Result<RelayHandleResult, ParseError> {
    Ok(RelayHandleResult {
        src_id: r.device(SRC_ID)?,
        sink_id: r.device(SINK_ID)?,
        status: r.i32(STATUS)?,
        requested: r.handles(HANDLE_IDS)?,
        granted: r.handles(GRANTED_HANDLE_IDS)?,
    })
}

/// Typed, validating accessor over one JSON object.
struct FieldReader<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> FieldReader<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    fn get(&self, name: &'static str) -> Result<&'a Value, ParseError> {
        self.map
            .get(name)
            .ok_or(ParseError::MissingOrWrongTypeField(name))
    }

    fn string(&self, name: &'static str) -> Result<&'a str, ParseError> {
        self.get(name)?
            .as_str()
            .ok_or(ParseError::MissingOrWrongTypeField(name))
    }

    fn device(&self, name: &'static str) -> Result<DeviceId, ParseError> {
        self.string(name).map(DeviceId::from)
    }

    fn handle(&self, name: &'static str) -> Result<HandleId, ParseError> {
        self.string(name).map(HandleId::from)
    }

    fn u64(&self, name: &'static str) -> Result<u64, ParseError> {
        self.get(name)?
            .as_u64()
            .ok_or(ParseError::MissingOrWrongTypeField(name))
    }

    fn u16(&self, name: &'static str) -> Result<u16, ParseError> {
        u16::try_from(self.u64(name)?).map_err(|_| ParseError::MissingOrWrongTypeField(name))
    }

    fn i32(&self, name: &'static str) -> Result<i32, ParseError> {
        let raw = self
            .get(name)?
            .as_i64()
            .ok_or(ParseError::MissingOrWrongTypeField(name))?;
        i32::try_from(raw).map_err(|_| ParseError::MissingOrWrongTypeField(name))
    }

    fn mask(&self, name: &'static str) -> Result<InputTypeMask, ParseError> {
        let raw = u32::try_from(self.u64(name)?)
            .map_err(|_| ParseError::MissingOrWrongTypeField(name))?;
        Ok(InputTypeMask(raw))
    }

    fn token(&self) -> Result<RelayToken, ParseError> {
        self.u64(RELAY_SESSION_ID).map(RelayToken)
    }

    fn array(&self, name: &'static str) -> Result<&'a Vec<Value>, ParseError> {
        self.get(name)?
            .as_array()
            .ok_or(ParseError::MissingOrWrongTypeField(name))
    }

    fn handles(&self, name: &'static str) -> Result<BTreeSet<HandleId>, ParseError> {
        self.array(name)?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(HandleId::from)
                    .ok_or(ParseError::MissingOrWrongTypeField(name))
            })
            .collect()
    }

    fn allow_list(&self, name: &'static str) -> Result<AllowList, ParseError> {
        self.array(name)?
            .iter()
            .map(|chord| -> Result<Vec<u32>, ParseError> {
                chord
                    .as_array()
                    .ok_or(ParseError::MissingOrWrongTypeField(name))?
                    .iter()
                    .map(|code| {
                        code.as_u64()
                            .and_then(|c| u32::try_from(c).ok())
                            .ok_or(ParseError::MissingOrWrongTypeField(name))
                    })
                    .collect()
            })
            .collect()
    }

    fn objects(&self, name: &'static str) -> Result<Vec<FieldReader<'a>>, ParseError> {
        self.array(name)?
            .iter()
            .map(|v| {
                v.as_object()
                    .map(FieldReader::new)
                    .ok_or(ParseError::MissingOrWrongTypeField(name))
            })
            .collect()
    }

    fn events(&self, name: &'static str) -> Result<Vec<InputEvent>, ParseError> {
        self.objects(name)?
            .iter()
            .map(|e| -> Result<InputEvent, ParseError> {
                Ok(InputEvent {
                    handle: e.handle(HANDLE_ID)?,
                    event_type: e.u16(EVENT_TYPE)?,
                    code: e.u16(CODE)?,
                    value: e.i32(VALUE)?,
                    when_us: e.u64(WHEN_US)?,
                })
            })
            .collect()
    }

    fn key_states(&self, name: &'static str) -> Result<Vec<KeyStateEntry>, ParseError> {
        self.objects(name)?
            .iter()
            .map(|k| -> Result<KeyStateEntry, ParseError> {
                Ok(KeyStateEntry {
                    handle: k.handle(HANDLE_ID)?,
                    code: k.u16(CODE)?,
                    value: k.i32(VALUE)?,
                })
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
