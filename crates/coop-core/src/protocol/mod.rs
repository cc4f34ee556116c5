//! Protocol module containing message types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_body, decode_datagram, decode_header, encode_message, split_frame, ProtocolError,
};
pub use messages::*;
