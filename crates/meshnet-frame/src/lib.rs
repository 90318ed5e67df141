//! MeshNet serial framing
//!
//! This crate turns `(src, dest, payload)` triples into byte-stuffed frames
//! for a half-duplex serial link, and rebuilds frames from a raw byte stream
//! one byte at a time.
//!
//! # Frame Layout
//!
//! ```text
//! +------+-----+-----+-----+------------------+-------+-------+
//! | 0x7E | len | src | dst | payload[0..len]  | crc_l | crc_h |
//! +------+-----+-----+-----+------------------+-------+-------+
//! ```
//!
//! Everything after the preamble is escaped: a `0x7E` or `0x7D` byte is sent
//! as `0x7D` followed by the byte XOR `0x20`. The CRC is CRC16/XMODEM over
//! `len`, `src`, `dst` and the payload.
//!
//! # Example
//!
//! ```rust
//! use meshnet_frame::{encode_frame, FrameDecoder};
//!
//! let bytes = encode_frame(5, 9, &[1, 2, 3]).unwrap();
//! let mut decoder = FrameDecoder::new(9);
//! let frames = decoder.push(&bytes);
//! assert_eq!(frames[0].payload, vec![1, 2, 3]);
//! assert_eq!(frames[0].src_addr, 5);
//! ```

mod crc;
mod error;
mod frame;

pub use crc::*;
pub use error::*;
pub use frame::*;
