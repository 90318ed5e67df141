//! Packet encoding and decoding.
//!
//! ## Packet Format
//!
//! | Disc. | Variant              | Body (little-endian)                                  |
//! |-------|----------------------|-------------------------------------------------------|
//! | 0x00  | DataToBase           | source_address(1) + data                              |
//! | 0x01  | DataToDevice         | dest_address(1) + data                                |
//! | 0x02  | Beacon               | network_id(2) + base_nonce(4)                         |
//! | 0x03  | BeaconChildResponse  | child_nonce(4) + tag(4)                               |
//! | 0x04  | BeaconParentResponse | child_nonce(4) + parent_nonce(4) + tag(4)             |
//! | 0x05  | AssignAddress        | child_nonce(4) + address(1) + max_route(1) + tag(4)   |

use crate::crypto::{Tag, TAG_SIZE};
use crate::{Packet, PacketError, PacketType};

// ============================================================================
// Encoding Functions
// ============================================================================

/// Encode a packet to bytes.
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let packet_type = packet.packet_type();
    let mut buf = Vec::with_capacity(packet_type.fixed_len().unwrap_or(16));
    buf.push(packet_type as u8);

    match packet {
        Packet::DataToBase {
            source_address: address,
            data,
        }
        | Packet::DataToDevice {
            dest_address: address,
            data,
        } => {
            buf.push(*address);
            buf.extend_from_slice(data);
        }
        Packet::Beacon {
            network_id,
            base_nonce,
        } => {
            buf.extend_from_slice(&network_id.to_le_bytes());
            buf.extend_from_slice(&base_nonce.to_le_bytes());
        }
        Packet::BeaconChildResponse { child_nonce, tag } => {
            buf.extend_from_slice(&child_nonce.to_le_bytes());
            buf.extend_from_slice(tag);
        }
        Packet::BeaconParentResponse {
            child_nonce,
            parent_nonce,
            tag,
        } => {
            buf.extend_from_slice(&child_nonce.to_le_bytes());
            buf.extend_from_slice(&parent_nonce.to_le_bytes());
            buf.extend_from_slice(tag);
        }
        Packet::AssignAddress {
            child_nonce,
            address,
            max_route,
            tag,
        } => {
            buf.extend_from_slice(&child_nonce.to_le_bytes());
            buf.push(*address);
            buf.push(*max_route);
            buf.extend_from_slice(tag);
        }
    }

    buf
}

// ============================================================================
// Decoding Functions
// ============================================================================

/// Decode a packet from bytes.
pub fn decode_packet(data: &[u8]) -> Result<Packet, PacketError> {
    let Some(&disc) = data.first() else {
        return Err(PacketError::decode_at(0, "Empty packet data"));
    };
    let packet_type = PacketType::from_u8(disc).ok_or(PacketError::InvalidPacketType(disc))?;

    if let Some(expected) = packet_type.fixed_len() {
        if data.len() != expected {
            return Err(PacketError::invalid_length(packet_type, expected, data.len()));
        }
    } else if data.len() < 2 {
        return Err(PacketError::decode_at(1, "Not enough data for address"));
    }

    let mut reader = Reader::new(data, 1);
    let packet = match packet_type {
        PacketType::DataToBase => Packet::DataToBase {
            source_address: reader.u8(),
            data: reader.rest().to_vec(),
        },
        PacketType::DataToDevice => Packet::DataToDevice {
            dest_address: reader.u8(),
            data: reader.rest().to_vec(),
        },
        PacketType::Beacon => Packet::Beacon {
            network_id: reader.u16_le(),
            base_nonce: reader.u32_le(),
        },
        PacketType::BeaconChildResponse => Packet::BeaconChildResponse {
            child_nonce: reader.u32_le(),
            tag: reader.tag(),
        },
        PacketType::BeaconParentResponse => Packet::BeaconParentResponse {
            child_nonce: reader.u32_le(),
            parent_nonce: reader.u32_le(),
            tag: reader.tag(),
        },
        PacketType::AssignAddress => Packet::AssignAddress {
            child_nonce: reader.u32_le(),
            address: reader.u8(),
            max_route: reader.u8(),
            tag: reader.tag(),
        },
    };

    Ok(packet)
}

/// Cursor over a packet whose length has already been validated.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], offset: usize) -> Self {
        Reader { data, offset }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16_le(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32_le(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn tag(&mut self) -> Tag {
        self.take::<TAG_SIZE>()
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset..];
        self.offset = self.data.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let encoded = encode_packet(&packet);
        if let Some(len) = packet.packet_type().fixed_len() {
            assert_eq!(encoded.len(), len);
        }
        assert_eq!(decode_packet(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_data_roundtrip() {
        roundtrip(Packet::DataToBase {
            source_address: 0,
            data: vec![],
        });
        roundtrip(Packet::DataToBase {
            source_address: 255,
            data: vec![0x00, 0x2D, 0xFF],
        });
        roundtrip(Packet::DataToDevice {
            dest_address: 17,
            data: vec![0x7E; 33],
        });
    }

    #[test]
    fn test_control_roundtrip() {
        roundtrip(Packet::Beacon {
            network_id: u16::MAX,
            base_nonce: u32::MAX,
        });
        roundtrip(Packet::Beacon {
            network_id: 0,
            base_nonce: 0,
        });
        roundtrip(Packet::beacon_child_response(u32::MAX, 1, 2));
        roundtrip(Packet::beacon_parent_response(0, u32::MAX, 3, 4));
        roundtrip(Packet::assign_address(42, 0, 255, 5, 6));
        roundtrip(Packet::assign_address(u32::MAX, 255, 255, 0, 0));
    }

    #[test]
    fn test_wire_layout() {
        let beacon = Packet::Beacon {
            network_id: 0x1234,
            base_nonce: 0xAABBCCDD,
        };
        assert_eq!(
            encode_packet(&beacon),
            vec![0x02, 0x34, 0x12, 0xDD, 0xCC, 0xBB, 0xAA]
        );

        let assign = Packet::AssignAddress {
            child_nonce: 7,
            address: 3,
            max_route: 5,
            tag: [0xA, 0xB, 0xC, 0xD],
        };
        assert_eq!(
            encode_packet(&assign),
            vec![0x05, 7, 0, 0, 0, 3, 5, 0xA, 0xB, 0xC, 0xD]
        );

        let data = Packet::DataToBase {
            source_address: 9,
            data: vec![1, 2],
        };
        assert_eq!(encode_packet(&data), vec![0x00, 9, 1, 2]);
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(
            decode_packet(&[]),
            Err(PacketError::DecodeError { offset: 0, .. })
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode_packet(&[0x06, 0, 0]),
            Err(PacketError::InvalidPacketType(0x06))
        );
    }

    #[test]
    fn test_decode_bad_length() {
        let mut encoded = encode_packet(&Packet::beacon_child_response(1, 2, 3));
        encoded.push(0);
        assert_eq!(
            decode_packet(&encoded),
            Err(PacketError::invalid_length(
                PacketType::BeaconChildResponse,
                9,
                10
            ))
        );

        assert!(decode_packet(&[0x02, 0x00]).is_err());
        assert!(decode_packet(&[0x05; 10]).is_err());
        assert!(decode_packet(&[0x00]).is_err());
    }

    #[test]
    fn test_decoded_tag_still_verifies() {
        let encoded = encode_packet(&Packet::assign_address(7, 3, 5, 111, 222));
        let decoded = decode_packet(&encoded).unwrap();
        assert!(decoded.verify_hmac(111, 222).is_ok());
    }
}
