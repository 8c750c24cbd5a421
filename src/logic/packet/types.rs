//! Packet Types
//!
//! Data structures only. Every optional field may be missing or empty; detectors
//! treat that as a non-match, never as an error.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TRANSPORT PROTOCOL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Icmp => "ICMP",
            TransportProtocol::Other => "OTHER",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TCP FLAGS
// ============================================================================

/// Raw TCP flag bits as carried in the TCP header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TcpFlags(pub u16);

impl TcpFlags {
    pub const FIN: u16 = 0x01;
    pub const SYN: u16 = 0x02;
    pub const RST: u16 = 0x04;
    pub const PSH: u16 = 0x08;
    pub const ACK: u16 = 0x10;
    pub const URG: u16 = 0x20;
    pub const ECE: u16 = 0x40;
    pub const CWR: u16 = 0x80;

    pub fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    /// SYN set, ACK clear (connection attempt)
    pub fn is_syn_only(&self) -> bool {
        self.contains(Self::SYN) && !self.contains(Self::ACK)
    }

    pub fn is_syn_ack(&self) -> bool {
        self.contains(Self::SYN) && self.contains(Self::ACK)
    }

    pub fn is_rst(&self) -> bool {
        self.contains(Self::RST)
    }
}

// ============================================================================
// PACKET RECORD
// ============================================================================

/// One parsed network packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Frame sequence number, unique within a capture
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    /// IPv4 or IPv6 in string form; may be empty
    pub src_ip: String,
    pub dst_ip: String,
    /// 0 = not applicable
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: TransportProtocol,
    /// Application protocol label ("HTTP", "DNS", "RTP", "ARP", ...)
    pub app_protocol: Option<String>,
    pub payload_len: u64,
    /// Dissector summary line
    pub info: Option<String>,
    pub tcp_flags: Option<TcpFlags>,
    /// Source hardware address (link layer), needed for ARP checks
    pub src_mac: Option<String>,
}

impl PacketRecord {
    pub fn new(frame_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            frame_number,
            timestamp,
            src_ip: String::new(),
            dst_ip: String::new(),
            src_port: 0,
            dst_port: 0,
            transport: TransportProtocol::Other,
            app_protocol: None,
            payload_len: 0,
            info: None,
            tcp_flags: None,
            src_mac: None,
        }
    }

    pub fn with_endpoints(mut self, src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16) -> Self {
        self.src_ip = src_ip.to_string();
        self.src_port = src_port;
        self.dst_ip = dst_ip.to_string();
        self.dst_port = dst_port;
        self
    }

    pub fn with_transport(mut self, transport: TransportProtocol) -> Self {
        self.transport = transport;
        self
    }

    /// Shortcut: TCP transport with the given flag bits
    pub fn with_tcp_flags(mut self, bits: u16) -> Self {
        self.transport = TransportProtocol::Tcp;
        self.tcp_flags = Some(TcpFlags::new(bits));
        self
    }

    pub fn with_protocol(mut self, label: &str) -> Self {
        self.app_protocol = Some(label.to_string());
        self
    }

    pub fn with_payload_len(mut self, len: u64) -> Self {
        self.payload_len = len;
        self
    }

    pub fn with_info(mut self, info: &str) -> Self {
        self.info = Some(info.to_string());
        self
    }

    pub fn with_src_mac(mut self, mac: &str) -> Self {
        self.src_mac = Some(mac.to_string());
        self
    }

    /// Timestamp in microseconds since the Unix epoch
    pub fn micros(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }

    /// Info string, empty when absent
    pub fn info_str(&self) -> &str {
        self.info.as_deref().unwrap_or("")
    }

    /// Non-empty application label
    pub fn protocol_label(&self) -> Option<&str> {
        self.app_protocol
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }

    /// Label match, case-insensitive
    pub fn has_protocol(&self, label: &str) -> bool {
        self.protocol_label()
            .map(|l| l.eq_ignore_ascii_case(label))
            .unwrap_or(false)
    }

    /// Application label if present, transport name otherwise
    pub fn effective_protocol(&self) -> String {
        match self.protocol_label() {
            Some(label) => label.to_ascii_uppercase(),
            None => self.transport.as_str().to_string(),
        }
    }

    pub fn flags(&self) -> TcpFlags {
        self.tcp_flags.unwrap_or_default()
    }

    pub fn is_tcp(&self) -> bool {
        self.transport == TransportProtocol::Tcp
    }

    pub fn is_udp(&self) -> bool {
        self.transport == TransportProtocol::Udp
    }

    pub fn is_icmp(&self) -> bool {
        self.transport == TransportProtocol::Icmp
    }

    /// Both IP fields populated
    pub fn has_addresses(&self) -> bool {
        !self.src_ip.trim().is_empty() && !self.dst_ip.trim().is_empty()
    }
}
