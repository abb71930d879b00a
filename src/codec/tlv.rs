//! TLV (type-length-value) payload format carried inside `ANNOUNCE` packets.
//!
//! Each element is `type(1) | length(1) | value(length)`. The decoder walks
//! the buffer element by element and stops cleanly — returning whatever it
//! has parsed so far — the moment it hits a malformed element (a length
//! byte claiming more bytes than remain). A malformed trailing element
//! never fails the whole payload.

use super::PEER_ID_LEN;

/// Known TLV element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    Nickname,
    DirectNeighbors,
    Unknown(u8),
}

impl TlvType {
    fn as_u8(self) -> u8 {
        match self {
            TlvType::Nickname => 0x01,
            TlvType::DirectNeighbors => 0x04,
            TlvType::Unknown(v) => v,
        }
    }

    fn from_u8(v: u8) -> TlvType {
        match v {
            0x01 => TlvType::Nickname,
            0x04 => TlvType::DirectNeighbors,
            other => TlvType::Unknown(other),
        }
    }
}

/// Parse a TLV byte stream into `(type, value)` elements, stopping at the
/// first malformed element (truncated length/value) rather than failing
/// the whole decode.
fn decode_elements(data: &[u8]) -> Vec<(TlvType, &[u8])> {
    let mut elements = Vec::new();
    let mut cursor = 0;
    while cursor + 2 <= data.len() {
        let tlv_type = TlvType::from_u8(data[cursor]);
        let len = data[cursor + 1] as usize;
        let value_start = cursor + 2;
        let value_end = value_start + len;
        if value_end > data.len() {
            break;
        }
        elements.push((tlv_type, &data[value_start..value_end]));
        cursor = value_end;
    }
    elements
}

/// Encode a single TLV element. `value.len()` must be ≤ 255 — the caller is
/// responsible for this (values longer than 255 bytes cannot be
/// represented and are a programming error, not a runtime one).
fn encode_element(tlv_type: TlvType, value: &[u8]) -> Vec<u8> {
    assert!(value.len() <= u8::MAX as usize, "TLV value exceeds 255 bytes");
    let mut buf = Vec::with_capacity(2 + value.len());
    buf.push(tlv_type.as_u8());
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
    buf
}

/// Encode a nickname as a single `NICKNAME` TLV element.
pub fn encode_nickname(nickname: &str) -> Vec<u8> {
    encode_element(TlvType::Nickname, nickname.as_bytes())
}

/// Decode the first `NICKNAME` element found in a TLV stream, if any.
/// Non-UTF-8 values are treated as absent rather than failing the decode.
pub fn decode_nickname(data: &[u8]) -> Option<String> {
    decode_elements(data).into_iter().find(|(t, _)| *t == TlvType::Nickname).and_then(|(_, v)| std::str::from_utf8(v).ok().map(|s| s.to_string()))
}

/// Encode a list of 8-byte peer IDs as a single `DIRECT_NEIGHBORS` TLV
/// element (a concatenation of the IDs). Up to 31 neighbors fit in the
/// 255-byte value limit.
pub fn encode_neighbors(neighbors: &[[u8; PEER_ID_LEN]]) -> Vec<u8> {
    let mut value = Vec::with_capacity(neighbors.len() * PEER_ID_LEN);
    for id in neighbors {
        value.extend_from_slice(id);
    }
    encode_element(TlvType::DirectNeighbors, &value)
}

/// Decode the first `DIRECT_NEIGHBORS` element found in a TLV stream, if
/// any. A value whose length is not a multiple of 8 is truncated to the
/// last whole peer ID rather than failing.
pub fn decode_neighbors(data: &[u8]) -> Vec<[u8; PEER_ID_LEN]> {
    let Some((_, value)) = decode_elements(data).into_iter().find(|(t, _)| *t == TlvType::DirectNeighbors) else {
        return Vec::new();
    };
    value.chunks_exact(PEER_ID_LEN).map(|chunk| chunk.try_into().unwrap()).collect()
}

/// Encode an announce payload combining nickname and direct-neighbor TLVs,
/// matching the `NICKNAME ∥ DIRECT_NEIGHBORS` layout used by the announce
/// scheduler.
pub fn encode_announce_payload(nickname: &str, neighbors: &[[u8; PEER_ID_LEN]]) -> Vec<u8> {
    let mut buf = encode_nickname(nickname);
    buf.extend_from_slice(&encode_neighbors(neighbors));
    buf
}
