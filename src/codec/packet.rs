//! `Packet` and `MessageType` definitions plus their binary encode/decode.

use super::{BROADCAST_ID, MIN_FRAME_LEN, PEER_ID_LEN, SIGNATURE_LEN};

/// Initial time-to-live assigned to a freshly originated packet.
pub const MAX_TTL: u8 = 7;

/// Known message types. Unknown wire values are preserved as
/// [`MessageType::Unknown`] — unknown types are valid packets that
/// get relayed but are never interpreted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Announce,
    Message,
    Leave,
    NoiseHandshake,
    NoiseEncrypted,
    Fragment,
    RequestSync,
    FileTransfer,
    Unknown(u8),
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Announce => 0x01,
            MessageType::Message => 0x02,
            MessageType::Leave => 0x03,
            MessageType::NoiseHandshake => 0x10,
            MessageType::NoiseEncrypted => 0x11,
            MessageType::Fragment => 0x20,
            MessageType::RequestSync => 0x21,
            MessageType::FileTransfer => 0x22,
            MessageType::Unknown(v) => v,
        }
    }

    pub fn from_u8(v: u8) -> MessageType {
        match v {
            0x01 => MessageType::Announce,
            0x02 => MessageType::Message,
            0x03 => MessageType::Leave,
            0x10 => MessageType::NoiseHandshake,
            0x11 => MessageType::NoiseEncrypted,
            0x20 => MessageType::Fragment,
            0x21 => MessageType::RequestSync,
            0x22 => MessageType::FileTransfer,
            other => MessageType::Unknown(other),
        }
    }
}

/// Flags byte bit assignments.
pub struct Flags;
impl Flags {
    pub const HAS_RECIPIENT: u8 = 0x01;
    pub const HAS_SIGNATURE: u8 = 0x02;
    pub const IS_COMPRESSED: u8 = 0x04;
    pub const HAS_ROUTE: u8 = 0x08;
}

/// A decoded (or to-be-encoded) mesh packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub message_type: MessageType,
    pub ttl: u8,
    pub timestamp: u64,
    pub sender_id: [u8; PEER_ID_LEN],
    pub recipient_id: Option<[u8; PEER_ID_LEN]>,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    /// Ordered sequence of peer IDs the packet has traversed. Only
    /// meaningful (and only encodable) for `version >= 2`.
    pub route: Option<Vec<[u8; PEER_ID_LEN]>>,
}

impl Packet {
    /// Convenience constructor for a v1 `MESSAGE` packet, as used in tests
    /// and by the mesh layer when broadcasting chat text.
    pub fn new_message(version: u8, sender_id: [u8; PEER_ID_LEN], recipient_id: Option<[u8; PEER_ID_LEN]>, payload: Vec<u8>, timestamp: u64) -> Packet {
        Packet {
            version,
            message_type: MessageType::Message,
            ttl: MAX_TTL,
            timestamp,
            sender_id,
            recipient_id,
            payload,
            signature: None,
            route: None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        match &self.recipient_id {
            None => true,
            Some(id) => *id == BROADCAST_ID,
        }
    }

    /// Encode the packet to its canonical wire representation.
    ///
    /// Buffer size is computed up front by summing each field's
    /// contribution, then filled in one pass. Optional fields
    /// (`recipient_id`, `signature`, each `route` hop) are always their
    /// canonical fixed length — callers are responsible for providing
    /// correctly sized arrays (the type system already enforces this via
    /// `[u8; N]`). `HAS_ROUTE` is only ever set when `version >= 2`.
    pub fn encode(&self) -> Vec<u8> {
        let has_recipient = self.recipient_id.is_some();
        let has_signature = self.signature.is_some();
        let has_route = self.version >= 2 && self.route.as_ref().is_some_and(|r| !r.is_empty());

        let mut flags = 0u8;
        if has_recipient {
            flags |= Flags::HAS_RECIPIENT;
        }
        if has_signature {
            flags |= Flags::HAS_SIGNATURE;
        }
        if has_route {
            flags |= Flags::HAS_ROUTE;
        }

        let payload_len_field_size = if self.version >= 2 { 4 } else { 2 };
        let route_len = if has_route {
            let hops = self.route.as_ref().unwrap();
            1 + hops.len() * PEER_ID_LEN
        } else {
            0
        };

        let mut len = 1 + 1 + 1 + 8 + 1 + payload_len_field_size; // version|type|ttl|timestamp|flags|payloadLen
        len += PEER_ID_LEN; // senderID
        if has_recipient {
            len += PEER_ID_LEN;
        }
        len += route_len;
        len += self.payload.len();
        if has_signature {
            len += SIGNATURE_LEN;
        }

        let mut buf = Vec::with_capacity(len);
        buf.push(self.version);
        buf.push(self.message_type.as_u8());
        buf.push(self.ttl);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.push(flags);
        if self.version >= 2 {
            buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        } else {
            buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        }
        buf.extend_from_slice(&self.sender_id);
        if let Some(recipient) = &self.recipient_id {
            buf.extend_from_slice(recipient);
        }
        if has_route {
            let hops = self.route.as_ref().unwrap();
            buf.push(hops.len() as u8);
            for hop in hops {
                buf.extend_from_slice(hop);
            }
        }
        buf.extend_from_slice(&self.payload);
        if let Some(sig) = &self.signature {
            buf.extend_from_slice(sig);
        }

        buf
    }

    /// Decode a packet from its wire representation.
    ///
    /// Returns `None` (never panics) when: the input is shorter than
    /// [`MIN_FRAME_LEN`]; the version is not 1 or 2; the declared payload
    /// length exceeds the remaining bytes; or `IS_COMPRESSED` is set
    /// (compression is not supported and is a hard decode failure, not a
    /// silent pass-through).
    pub fn decode(data: &[u8]) -> Option<Packet> {
        if data.len() < MIN_FRAME_LEN {
            return None;
        }

        let version = data[0];
        if version != 1 && version != 2 {
            return None;
        }
        let message_type = MessageType::from_u8(data[1]);
        let ttl = data[2];
        let timestamp = u64::from_be_bytes(data[3..11].try_into().ok()?);
        let flags = data[11];
        if flags & Flags::IS_COMPRESSED != 0 {
            return None;
        }

        let mut cursor = 12;
        let payload_len: usize = if version >= 2 {
            let bytes: [u8; 4] = data.get(cursor..cursor + 4)?.try_into().ok()?;
            cursor += 4;
            u32::from_be_bytes(bytes) as usize
        } else {
            let bytes: [u8; 2] = data.get(cursor..cursor + 2)?.try_into().ok()?;
            cursor += 2;
            u16::from_be_bytes(bytes) as usize
        };

        let sender_id: [u8; PEER_ID_LEN] = data.get(cursor..cursor + PEER_ID_LEN)?.try_into().ok()?;
        cursor += PEER_ID_LEN;

        let has_recipient = flags & Flags::HAS_RECIPIENT != 0;
        let recipient_id = if has_recipient {
            let id: [u8; PEER_ID_LEN] = data.get(cursor..cursor + PEER_ID_LEN)?.try_into().ok()?;
            cursor += PEER_ID_LEN;
            Some(id)
        } else {
            None
        };

        // HAS_ROUTE is meaningless on v1: ignored on decode, never set on encode.
        let has_route = version >= 2 && flags & Flags::HAS_ROUTE != 0;
        let route = if has_route {
            let count = *data.get(cursor)? as usize;
            cursor += 1;
            let mut hops = Vec::with_capacity(count);
            for _ in 0..count {
                let hop: [u8; PEER_ID_LEN] = data.get(cursor..cursor + PEER_ID_LEN)?.try_into().ok()?;
                cursor += PEER_ID_LEN;
                hops.push(hop);
            }
            Some(hops)
        } else {
            None
        };

        if cursor + payload_len > data.len() {
            return None;
        }
        let payload = data[cursor..cursor + payload_len].to_vec();
        cursor += payload_len;

        let has_signature = flags & Flags::HAS_SIGNATURE != 0;
        let signature = if has_signature {
            let sig: [u8; SIGNATURE_LEN] = data.get(cursor..cursor + SIGNATURE_LEN)?.try_into().ok()?;
            Some(sig)
        } else {
            None
        };

        Some(Packet {
            version,
            message_type,
            ttl,
            timestamp,
            sender_id,
            recipient_id,
            payload,
            signature,
            route,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_v1_roundtrip_without_optional_fields() {
        let packet = Packet::new_message(1, [1, 2, 3, 4, 5, 6, 7, 8], None, vec![0xAA, 0xBB, 0xCC], 1000);
        let encoded = packet.encode();
        // 1+1+1+8+1+2 header + 8 senderID + 3 payload = 25 bytes.
        assert_eq!(encoded.len(), 25);
        let decoded = Packet::decode(&encoded).expect("decode should succeed");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn encode_decode_v2_roundtrip_with_all_optional_fields() {
        let packet = Packet {
            version: 2,
            message_type: MessageType::Announce,
            ttl: 5,
            timestamp: 123_456_789,
            sender_id: [9; 8],
            recipient_id: Some([0xFF; 8]),
            payload: vec![1, 2, 3, 4, 5],
            signature: Some([7; 64]),
            route: Some(vec![[1; 8], [2; 8]]),
        };
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).expect("decode should succeed");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn truncated_input_fails_to_decode() {
        let short = vec![0u8; 21];
        assert!(Packet::decode(&short).is_none());
    }

    #[test]
    fn unsupported_version_fails_to_decode() {
        let mut data = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 1).encode();
        data[0] = 3;
        assert!(Packet::decode(&data).is_none());
    }

    #[test]
    fn payload_length_exceeding_remaining_bytes_fails_to_decode() {
        let mut data = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 1).encode();
        // Bump the declared payload length (bytes 12..14 for v1) far beyond what remains.
        data[12] = 0xFF;
        data[13] = 0xFF;
        assert!(Packet::decode(&data).is_none());
    }

    #[test]
    fn compressed_flag_is_a_hard_decode_failure() {
        let mut data = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 1).encode();
        data[11] |= Flags::IS_COMPRESSED;
        assert!(Packet::decode(&data).is_none());
    }

    #[test]
    fn has_route_is_ignored_on_v1_decode() {
        let mut data = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 1).encode();
        data[11] |= Flags::HAS_ROUTE;
        let decoded = Packet::decode(&data).expect("v1 with HAS_ROUTE set should still decode");
        assert!(decoded.route.is_none());
    }

    #[test]
    fn has_route_is_never_set_on_v1_encode() {
        let packet = Packet {
            version: 1,
            message_type: MessageType::Message,
            ttl: 7,
            timestamp: 1,
            sender_id: [1; 8],
            recipient_id: None,
            payload: vec![],
            signature: None,
            route: Some(vec![[2; 8]]),
        };
        let encoded = packet.encode();
        assert_eq!(encoded[11] & Flags::HAS_ROUTE, 0);
    }

    #[test]
    fn unknown_message_type_round_trips_and_is_never_interpreted() {
        let packet = Packet {
            version: 1,
            message_type: MessageType::Unknown(0x42),
            ttl: 7,
            timestamp: 1,
            sender_id: [1; 8],
            recipient_id: None,
            payload: vec![],
            signature: None,
            route: None,
        };
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.message_type, MessageType::Unknown(0x42));
    }

    #[test]
    fn broadcast_recipient_detection() {
        let broadcast = Packet::new_message(1, [1; 8], Some(BROADCAST_ID), vec![], 1);
        assert!(broadcast.is_broadcast());
        let direct = Packet::new_message(1, [1; 8], Some([2; 8]), vec![], 1);
        assert!(!direct.is_broadcast());
        let implicit = Packet::new_message(1, [1; 8], None, vec![], 1);
        assert!(implicit.is_broadcast());
    }
}
