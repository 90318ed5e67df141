//! Packet types.

use std::fmt;

use crate::codec::encode_packet;
use crate::crypto::{compute_tag, hmac_key, verify_tag, Tag, TAG_SIZE};
use crate::PacketError;

/// Packet type discriminant (first byte of every packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Application data from a device to the base.
    DataToBase = 0x00,
    /// Application data from the base to a device.
    DataToDevice = 0x01,
    /// Discovery beacon flooded by the base.
    Beacon = 0x02,
    /// A node heard the beacon directly from the base.
    BeaconChildResponse = 0x03,
    /// A node reporting one of its children.
    BeaconParentResponse = 0x04,
    /// Address assignment for one node.
    AssignAddress = 0x05,
}

impl PacketType {
    /// Parse a discriminant byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(PacketType::DataToBase),
            0x01 => Some(PacketType::DataToDevice),
            0x02 => Some(PacketType::Beacon),
            0x03 => Some(PacketType::BeaconChildResponse),
            0x04 => Some(PacketType::BeaconParentResponse),
            0x05 => Some(PacketType::AssignAddress),
            _ => None,
        }
    }

    /// Name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::DataToBase => "DataToBase",
            PacketType::DataToDevice => "DataToDevice",
            PacketType::Beacon => "Beacon",
            PacketType::BeaconChildResponse => "BeaconChildResponse",
            PacketType::BeaconParentResponse => "BeaconParentResponse",
            PacketType::AssignAddress => "AssignAddress",
        }
    }

    /// Exact encoded size (discriminant included) for fixed-size types.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            PacketType::DataToBase | PacketType::DataToDevice => None,
            PacketType::Beacon => Some(1 + 2 + 4),
            PacketType::BeaconChildResponse => Some(1 + 4 + TAG_SIZE),
            PacketType::BeaconParentResponse => Some(1 + 4 + 4 + TAG_SIZE),
            PacketType::AssignAddress => Some(1 + 4 + 1 + 1 + TAG_SIZE),
        }
    }

    /// Whether packets of this type carry an HMAC tag.
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            PacketType::BeaconChildResponse
                | PacketType::BeaconParentResponse
                | PacketType::AssignAddress
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A network-layer packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Data from the device at `source_address`.
    DataToBase {
        /// Mesh address of the sender.
        source_address: u8,
        /// RPC bytes.
        data: Vec<u8>,
    },
    /// Data for the device at `dest_address`.
    DataToDevice {
        /// Mesh address of the receiver.
        dest_address: u8,
        /// RPC bytes.
        data: Vec<u8>,
    },
    /// Starts a discovery round.
    Beacon {
        /// Network the beacon belongs to.
        network_id: u16,
        /// Random nonce of this round.
        base_nonce: u32,
    },
    /// A node that is one hop from the base.
    BeaconChildResponse {
        /// Nonce of the responding node.
        child_nonce: u32,
        /// HMAC32 over `(base_nonce, network_key)`.
        tag: Tag,
    },
    /// A parent/child edge.
    BeaconParentResponse {
        /// Nonce of the child.
        child_nonce: u32,
        /// Nonce of the parent.
        parent_nonce: u32,
        /// HMAC32 over `(base_nonce, network_key)`.
        tag: Tag,
    },
    /// Assigns `address` and the subtree range up to `max_route`.
    AssignAddress {
        /// Nonce of the node being addressed.
        child_nonce: u32,
        /// Mesh address of the node.
        address: u8,
        /// Last address in the node's subtree.
        max_route: u8,
        /// HMAC32 over `(base_nonce, child_nonce, network_key)`.
        tag: Tag,
    },
}

impl Packet {
    /// Create a beacon child response with a valid tag.
    pub fn beacon_child_response(child_nonce: u32, base_nonce: u32, network_key: u16) -> Self {
        let mut packet = Packet::BeaconChildResponse {
            child_nonce,
            tag: [0; TAG_SIZE],
        };
        packet.sign(base_nonce, network_key);
        packet
    }

    /// Create a beacon parent response with a valid tag.
    pub fn beacon_parent_response(
        child_nonce: u32,
        parent_nonce: u32,
        base_nonce: u32,
        network_key: u16,
    ) -> Self {
        let mut packet = Packet::BeaconParentResponse {
            child_nonce,
            parent_nonce,
            tag: [0; TAG_SIZE],
        };
        packet.sign(base_nonce, network_key);
        packet
    }

    /// Create an address assignment with a valid tag.
    pub fn assign_address(
        child_nonce: u32,
        address: u8,
        max_route: u8,
        base_nonce: u32,
        network_key: u16,
    ) -> Self {
        let mut packet = Packet::AssignAddress {
            child_nonce,
            address,
            max_route,
            tag: [0; TAG_SIZE],
        };
        packet.sign(base_nonce, network_key);
        packet
    }

    /// Get the packet type.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::DataToBase { .. } => PacketType::DataToBase,
            Packet::DataToDevice { .. } => PacketType::DataToDevice,
            Packet::Beacon { .. } => PacketType::Beacon,
            Packet::BeaconChildResponse { .. } => PacketType::BeaconChildResponse,
            Packet::BeaconParentResponse { .. } => PacketType::BeaconParentResponse,
            Packet::AssignAddress { .. } => PacketType::AssignAddress,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode_packet(self)
    }

    /// Check the HMAC tag against the round's base nonce and the network key.
    ///
    /// Fails with [`PacketError::NotAuthenticated`] for packet types that carry
    /// no tag, and [`PacketError::InvalidTag`] on mismatch.
    pub fn verify_hmac(&self, base_nonce: u32, network_key: u16) -> Result<(), PacketError> {
        let Some((key, tag)) = self.auth_parts(base_nonce, network_key) else {
            return Err(PacketError::NotAuthenticated(self.packet_type()));
        };
        let bytes = self.encode();
        let message = &bytes[..bytes.len() - TAG_SIZE];
        if verify_tag(&key, message, &tag) {
            Ok(())
        } else {
            Err(PacketError::InvalidTag(self.packet_type()))
        }
    }

    /// HMAC key and current tag, for authenticated variants.
    fn auth_parts(&self, base_nonce: u32, network_key: u16) -> Option<(Vec<u8>, Tag)> {
        match self {
            Packet::BeaconChildResponse { tag, .. } | Packet::BeaconParentResponse { tag, .. } => {
                Some((hmac_key(base_nonce, None, network_key), *tag))
            }
            Packet::AssignAddress {
                child_nonce, tag, ..
            } => Some((hmac_key(base_nonce, Some(*child_nonce), network_key), *tag)),
            _ => None,
        }
    }

    fn sign(&mut self, base_nonce: u32, network_key: u16) {
        let Some((key, _)) = self.auth_parts(base_nonce, network_key) else {
            return;
        };
        let bytes = self.encode();
        let new_tag = compute_tag(&key, &bytes[..bytes.len() - TAG_SIZE]);
        match self {
            Packet::BeaconChildResponse { tag, .. }
            | Packet::BeaconParentResponse { tag, .. }
            | Packet::AssignAddress { tag, .. } => *tag = new_tag,
            _ => {}
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::DataToBase {
                source_address,
                data,
            } => write!(f, "DataToBase(from={}, data={})", source_address, hex::encode(data)),
            Packet::DataToDevice { dest_address, data } => {
                write!(f, "DataToDevice(to={}, data={})", dest_address, hex::encode(data))
            }
            Packet::Beacon {
                network_id,
                base_nonce,
            } => write!(f, "Beacon(network={}, nonce={:#010x})", network_id, base_nonce),
            Packet::BeaconChildResponse { child_nonce, tag } => write!(
                f,
                "BeaconChildResponse(child={:#010x}, tag={})",
                child_nonce,
                hex::encode(tag)
            ),
            Packet::BeaconParentResponse {
                child_nonce,
                parent_nonce,
                tag,
            } => write!(
                f,
                "BeaconParentResponse(child={:#010x}, parent={:#010x}, tag={})",
                child_nonce,
                parent_nonce,
                hex::encode(tag)
            ),
            Packet::AssignAddress {
                child_nonce,
                address,
                max_route,
                tag,
            } => write!(
                f,
                "AssignAddress(child={:#010x}, address={}, max_route={}, tag={})",
                child_nonce,
                address,
                max_route,
                hex::encode(tag)
            ),
        }
    }
}
