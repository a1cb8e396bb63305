//! Integration tests for the dinput-core frame codec.
//!
//! These drive the public API the way a transport does: frames arrive
//! back-to-back in one buffer, headers are peeked before the payload is
//! complete, and malformed frames must be rejected without producing a
//! message.

use std::collections::BTreeSet;

use dinput_core::protocol::{
    decode_header, decode_message, encode_message,
    messages::{
        status, CommandCode, DInputMessage, HandleRequest, PreparedReply, RelayTarget,
        SessionRequest, TypeReply, HEADER_SIZE,
    },
    SequenceCounter,
};
use dinput_core::{HandleId, InputTypeMask, ParseError, RelayToken};

fn prepare(from: &str) -> DInputMessage {
    DInputMessage::Prepare(SessionRequest {
        device_id: from.into(),
    })
}

#[test]
fn test_stream_of_frames_decodes_in_order_with_increasing_sequence() {
    // Arrange
    let seq = SequenceCounter::new();
    let messages = vec![
        prepare("src"),
        DInputMessage::StartByHandles(HandleRequest {
            device_id: "src".into(),
            handles: [HandleId::from("H1"), HandleId::from("H2")].into_iter().collect(),
        }),
        DInputMessage::RelayPrepare(RelayTarget {
            device_id: "a".into(),
            src_id: "b".into(),
            sink_id: "c".into(),
        }),
    ];
    let mut stream = Vec::new();
    for msg in &messages {
        stream.extend(encode_message(msg, seq.next(), 0).expect("encode"));
    }

    // Act
    let mut cursor = 0;
    let mut decoded = Vec::new();
    let mut sequences = Vec::new();
    while cursor < stream.len() {
        let header = decode_header(&stream[cursor..]).expect("header");
        let (msg, used) = decode_message(&stream[cursor..]).expect("frame");
        sequences.push(header.sequence_number);
        decoded.push(msg);
        cursor += used;
    }

    // Assert
    assert_eq!(decoded, messages);
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[test]
fn test_header_is_readable_before_payload_arrives() {
    // Arrange
    let bytes = encode_message(&prepare("src"), 9, 0).expect("encode");
    let partial = &bytes[..HEADER_SIZE + 2];

    // Act
    let header = decode_header(partial).expect("header only needs 28 bytes");
    let frame = decode_message(partial);

    // Assert
    assert_eq!(header.command, CommandCode::Prepare);
    assert_eq!(HEADER_SIZE + header.payload_length as usize, bytes.len());
    assert!(matches!(frame, Err(ParseError::PayloadLengthMismatch { .. })));
}

#[test]
fn test_start_answer_keeps_granted_subset_distinct_from_request() {
    let reply = DInputMessage::OnStartedByType(TypeReply {
        device_id: "sink".into(),
        status: status::OK,
        requested: InputTypeMask::MOUSE | InputTypeMask::TOUCHPAD,
        granted: InputTypeMask::MOUSE,
    });

    let (decoded, _) = decode_message(&encode_message(&reply, 0, 0).unwrap()).unwrap();

    let DInputMessage::OnStartedByType(body) = decoded else {
        panic!("expected OnStartedByType, got {decoded:?}");
    };
    assert_eq!(body.requested, InputTypeMask::MOUSE | InputTypeMask::TOUCHPAD);
    assert_eq!(body.granted, InputTypeMask::MOUSE);
}

#[test]
fn test_relayed_answer_carries_token_and_reply() {
    let msg = DInputMessage::OnRelayPrepared {
        token: RelayToken(41),
        reply: PreparedReply {
            device_id: "c".into(),
            status: status::OK,
            allow_list: vec![],
        },
    };

    let (decoded, _) = decode_message(&encode_message(&msg, 0, 0).unwrap()).unwrap();

    assert_eq!(decoded, msg);
}

#[test]
fn test_corrupted_command_code_is_reported_not_misparsed() {
    // Arrange
    let mut bytes = encode_message(&prepare("src"), 0, 0).unwrap();
    bytes[4..8].copy_from_slice(&0x0000_0FFFu32.to_be_bytes());

    // Act / Assert
    assert_eq!(decode_message(&bytes), Err(ParseError::UnknownCommand(0x0FFF)));
}

#[test]
fn test_empty_handle_set_is_valid() {
    let msg = DInputMessage::StartByHandles(HandleRequest {
        device_id: "src".into(),
        handles: BTreeSet::new(),
    });

    let (decoded, _) = decode_message(&encode_message(&msg, 0, 0).unwrap()).unwrap();

    assert_eq!(decoded, msg);
}
