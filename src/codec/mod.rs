//! Wire codec for the mesh packet format (v1, v2) and its TLV payload.
//!
//! Framing is fixed-order, big-endian:
//!
//! ```text
//! version(1) | type(1) | ttl(1) | timestamp(8) | flags(1) | payloadLen(v1:2 / v2:4)
//! senderID(8)
//! [recipientID(8)]            if HAS_RECIPIENT
//! [route: count(1) | id(8)×count]   v2 only, if HAS_ROUTE
//! payload(payloadLen)
//! [signature(64)]             if HAS_SIGNATURE
//! ```
//!
//! This is a hand-rolled byte-level codec rather than a `serde`/`bincode`
//! derive: the format is bit-exact and versioned, and the header layout
//! differs between v1 and v2 in a way a derive macro can't express.

mod packet;
mod tlv;

pub use packet::{Flags, MessageType, Packet, MAX_TTL};
pub use tlv::{decode_neighbors, decode_nickname, encode_neighbors, encode_nickname, TlvType};

/// Size of a peer ID in bytes.
pub const PEER_ID_LEN: usize = 8;
/// All-0xFF peer ID, used as the broadcast recipient.
pub const BROADCAST_ID: [u8; PEER_ID_LEN] = [0xFF; PEER_ID_LEN];
/// Size of the optional signature field.
pub const SIGNATURE_LEN: usize = 64;

/// Minimum decodable frame length: the v1 header (14 bytes) plus a sender
/// ID (8 bytes). Anything shorter fails to decode.
pub const MIN_FRAME_LEN: usize = 14 + PEER_ID_LEN;

/// Render a peer ID as canonical lowercase hex.
pub fn to_hex(id: &[u8]) -> String {
    let mut s = String::with_capacity(id.len() * 2);
    for b in id {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Compute the FNV-1a 32-bit fingerprint of a packet: hash the
/// ASCII concatenation `version|type|senderHex|recipientHex|timestamp|
/// payloadHex|signatureHex|routeConcatHex`, with empty strings for absent
/// optional fields, rendered as lowercase hex.
pub fn fingerprint(packet: &Packet) -> String {
    let mut s = String::new();
    s.push_str(&packet.version.to_string());
    s.push('|');
    s.push_str(&packet.message_type.as_u8().to_string());
    s.push('|');
    s.push_str(&to_hex(&packet.sender_id));
    s.push('|');
    if let Some(recipient) = &packet.recipient_id {
        s.push_str(&to_hex(recipient));
    }
    s.push('|');
    s.push_str(&packet.timestamp.to_string());
    s.push('|');
    s.push_str(&to_hex(&packet.payload));
    s.push('|');
    if let Some(sig) = &packet.signature {
        s.push_str(&to_hex(sig));
    }
    s.push('|');
    if let Some(route) = &packet.route {
        for hop in route {
            s.push_str(&to_hex(hop));
        }
    }

    fnv1a_32_hex(s.as_bytes())
}

/// FNV-1a 32-bit hash, rendered as lowercase hex.
fn fnv1a_32_hex(data: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:08x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_identical_packets() {
        let p1 = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 10);
        let p2 = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 10);
        assert_eq!(fingerprint(&p1), fingerprint(&p2));
    }

    #[test]
    fn fingerprint_differs_for_different_payloads() {
        let p1 = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 10);
        let p2 = Packet::new_message(1, [1; 8], None, vec![1, 2, 4], 10);
        assert_ne!(fingerprint(&p1), fingerprint(&p2));
    }

    #[test]
    fn to_hex_is_lowercase_canonical() {
        assert_eq!(to_hex(&[0xAB, 0x01]), "ab01");
    }
}
