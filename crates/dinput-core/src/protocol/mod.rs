//! Wire protocol: message types, the framed JSON codec, and per-channel
//! sequence numbering.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{
    decode_header, decode_message, encode_message, encode_message_now, frame_length, ParseError,
};
pub use messages::*;
pub use sequence::SequenceCounter;
