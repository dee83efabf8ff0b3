//! Low-level protocol types: frames, the incremental parser, message
//! builders/decoders and shared value encodings.

pub mod encoding;
pub mod message;
pub mod packet;
pub mod parser;

pub use encoding::{decode_duration, decode_float, encode_duration};
pub use message::{
    message_type, transmit_complete, transmit_option, update_status, ApplicationCommand,
    ApplicationUpdate, DEFAULT_TRANSMIT_OPTIONS,
};
pub use packet::{Packet, PacketType, Preamble, MAX_BODY_LEN};
pub use parser::Parser;
