//! Packet Module
//!
//! Read-only view of parsed packets supplied by the capture/parse layer.
//! Detection never mutates a `PacketRecord`.
//!
//! ## Structure
//! - `types`: `PacketRecord`, `TransportProtocol`, `TcpFlags`
//! - `address`: IP helpers (private ranges, conversation keys)

pub mod types;
pub mod address;

pub use types::{PacketRecord, TcpFlags, TransportProtocol};
pub use address::{conversation_key, is_private_ip, parse_ip, ConversationKey};
