//! Protocol module containing printer message types, the binary codec, the
//! announce payload and the job sequence counter.

pub mod announce;
pub mod codec;
pub mod messages;
pub mod sequence;

pub use announce::AnnouncePayload;
pub use codec::{decode_printer_message, encode_printer_message, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
