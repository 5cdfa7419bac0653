//! Core packet types and frame decoding

pub mod packet;
pub mod parser;

pub use packet::UdpPacket;
pub use parser::decode_frame;
