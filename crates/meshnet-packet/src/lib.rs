//! MeshNet network-layer packets
//!
//! Every link frame carries one packet. The first byte is a discriminant
//! selecting the variant; all multi-byte fields are little-endian. Discovery
//! control packets coming from nodes carry a 4-byte truncated HMAC-SHA1 tag
//! keyed by the round's base nonce and the shared network key.
//!
//! # Example
//!
//! ```rust
//! use meshnet_packet::{decode_packet, Packet};
//!
//! let packet = Packet::assign_address(7, 3, 5, 111, 222);
//! let bytes = packet.encode();
//! let decoded = decode_packet(&bytes).unwrap();
//! assert!(decoded.verify_hmac(111, 222).is_ok());
//! assert!(decoded.verify_hmac(111, 223).is_err());
//! ```

pub mod codec;
pub mod crypto;
mod error;
mod packet;

pub use codec::{decode_packet, encode_packet};
pub use crypto::{Tag, TAG_SIZE};
pub use error::*;
pub use packet::*;
