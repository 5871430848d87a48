//! Protocol module containing message types and the encrypted line codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_frame, encode_frame, LineFramer, ProtocolError};
pub use messages::*;
