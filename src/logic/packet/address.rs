//! Address helpers
//!
//! Parsing is defensive: anything that does not parse is "unknown", and
//! unknown addresses never match a rule that needs them.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::types::PacketRecord;

/// Parse an IP string, tolerating surrounding whitespace
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse::<IpAddr>().ok()
}

/// RFC 1918 / loopback / link-local / ULA
///
/// Returns false for strings that are not IP addresses.
pub fn is_private_ip(raw: &str) -> bool {
    match parse_ip(raw) {
        Some(IpAddr::V4(v4)) => is_private_v4(&v4),
        Some(IpAddr::V6(v6)) => is_private_v6(&v6),
        None => false,
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link-local
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Unordered endpoint pair identifying one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub a: (String, u16),
    pub b: (String, u16),
}

impl ConversationKey {
    pub fn label(&self) -> String {
        format!("{}:{} <-> {}:{}", self.a.0, self.a.1, self.b.0, self.b.1)
    }
}

/// Both directions of a flow map to the same key
pub fn conversation_key(packet: &PacketRecord) -> Option<ConversationKey> {
    if !packet.has_addresses() {
        return None;
    }
    let src = (packet.src_ip.trim().to_string(), packet.src_port);
    let dst = (packet.dst_ip.trim().to_string(), packet.dst_port);
    let (a, b) = if src <= dst { (src, dst) } else { (dst, src) };
    Some(ConversationKey { a, b })
}
