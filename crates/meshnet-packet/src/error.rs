//! Error types for meshnet-packet.

use thiserror::Error;

use crate::PacketType;

/// Errors that can occur during packet operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Decode error at a specific offset.
    #[error("Decode error at offset {offset}: {message}")]
    DecodeError {
        /// Byte offset where the error occurred.
        offset: usize,
        /// Description of the error.
        message: String,
    },

    /// Discriminant byte does not name a packet type.
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    /// A fixed-size packet with the wrong number of bytes.
    #[error("Invalid length for {packet_type}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Packet type named by the discriminant.
        packet_type: PacketType,
        /// Required length, discriminant included.
        expected: usize,
        /// Received length.
        actual: usize,
    },

    /// HMAC tag does not match the packet contents.
    #[error("Invalid HMAC tag on {0}")]
    InvalidTag(PacketType),

    /// `verify_hmac` called on a packet type that carries no tag.
    #[error("{0} packets are not authenticated")]
    NotAuthenticated(PacketType),
}

impl PacketError {
    /// Create a decode error at a specific offset.
    pub fn decode_at(offset: usize, message: impl Into<String>) -> Self {
        PacketError::DecodeError {
            offset,
            message: message.into(),
        }
    }

    /// Create a length error for a fixed-size packet.
    pub fn invalid_length(packet_type: PacketType, expected: usize, actual: usize) -> Self {
        PacketError::InvalidLength {
            packet_type,
            expected,
            actual,
        }
    }
}
