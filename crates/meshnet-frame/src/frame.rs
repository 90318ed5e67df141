//! Frame encoding/decoding.
//!
//! Encoding produces a complete, stuffed byte sequence starting with the
//! preamble. Decoding is a byte-at-a-time state machine: a preamble always
//! restarts collection, so the decoder recovers from any corruption at the
//! next frame boundary.

use bytes::{BufMut, BytesMut};
use meshnet_metrics::metric_defs;

use crate::{crc16_xmodem, FrameError};

/// Maximum size of an unstuffed frame (header, payload and CRC).
pub const MAX_FRAME_SIZE: usize = 40;

/// Length byte, two address bytes and two CRC bytes.
pub const FRAME_OVERHEAD: usize = 5;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

/// Marks the start of a frame.
pub const PREAMBLE: u8 = 0x7E;

/// Announces that the next byte was XOR-ed with [`ESCAPE_MASK`].
pub const ESCAPE: u8 = 0x7D;

/// Mask applied to escaped bytes.
pub const ESCAPE_MASK: u8 = 0x20;

/// Destination link address that every interface accepts.
pub const BROADCAST_ADDR: u8 = 0;

/// A decoded (or to-be-encoded) link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Link address of the sender.
    pub src_addr: u8,
    /// Link address of the receiver, or [`BROADCAST_ADDR`].
    pub dest_addr: u8,
    /// Frame payload (a packet).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(src_addr: u8, dest_addr: u8, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            src_addr,
            dest_addr,
            payload: payload.into(),
        }
    }

    /// Whether the frame is addressed to every neighbor.
    pub fn is_broadcast(&self) -> bool {
        self.dest_addr == BROADCAST_ADDR
    }

    /// Unstuffed wire bytes: `len, src, dest, payload, crc_lo, crc_hi`.
    pub fn to_raw_bytes(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: self.payload.len(),
            });
        }

        let mut buf = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        buf.push(self.payload.len() as u8);
        buf.push(self.src_addr);
        buf.push(self.dest_addr);
        buf.extend_from_slice(&self.payload);
        let crc = crc16_xmodem(&buf);
        buf.put_u16_le(crc);
        Ok(buf)
    }

    /// Parse unstuffed wire bytes, verifying length and CRC.
    pub fn from_raw_bytes(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < FRAME_OVERHEAD {
            return Err(FrameError::FrameTooShort {
                expected: FRAME_OVERHEAD,
                actual: raw.len(),
            });
        }

        let declared = raw[0] as usize;
        let actual = raw.len() - FRAME_OVERHEAD;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }

        let body_len = raw.len() - 2;
        let computed = crc16_xmodem(&raw[..body_len]);
        let received = u16::from_le_bytes([raw[body_len], raw[body_len + 1]]);
        if computed != received {
            return Err(FrameError::CrcMismatch { computed, received });
        }

        Ok(Frame {
            src_addr: raw[1],
            dest_addr: raw[2],
            payload: raw[3..body_len].to_vec(),
        })
    }

    /// Stuffed bytes ready for the transport, starting with the preamble.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let raw = self.to_raw_bytes()?;
        Ok(stuff(&raw))
    }
}

/// Encode a frame from its parts.
pub fn encode_frame(src_addr: u8, dest_addr: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    Frame::new(src_addr, dest_addr, payload).encode()
}

/// Prefix the preamble and escape every reserved byte in `raw`.
fn stuff(raw: &[u8]) -> Vec<u8> {
    // Worst case every byte is escaped.
    let mut out = Vec::with_capacity(1 + raw.len() * 2);
    out.push(PREAMBLE);
    for &byte in raw {
        if byte == PREAMBLE || byte == ESCAPE {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_MASK);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Incremental frame decoder for one link interface.
///
/// Feed it bytes as they arrive; it yields frames addressed to `local_addr`
/// or to [`BROADCAST_ADDR`] whose CRC checks out. Everything else is dropped.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Our link address on this interface.
    local_addr: u8,
    /// Unstuffed bytes of the frame being collected.
    buffer: BytesMut,
    /// The previous byte was an escape.
    escape_pending: bool,
    /// Payload length announced by the first byte after the preamble.
    declared_len: Option<u8>,
    /// Ignore everything until the next preamble.
    awaiting_preamble: bool,
}

impl FrameDecoder {
    /// Create a decoder that accepts frames sent to `local_addr`.
    pub fn new(local_addr: u8) -> Self {
        FrameDecoder {
            local_addr,
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
            escape_pending: false,
            declared_len: None,
            awaiting_preamble: true,
        }
    }

    /// Our link address.
    pub fn local_addr(&self) -> u8 {
        self.local_addr
    }

    /// Feed a single byte. Returns a frame when this byte completes one.
    pub fn push_byte(&mut self, byte: u8) -> Option<Frame> {
        if byte == PREAMBLE {
            self.restart();
            return None;
        }
        if self.awaiting_preamble {
            return None;
        }
        if byte == ESCAPE {
            self.escape_pending = true;
            return None;
        }

        let byte = if self.escape_pending {
            self.escape_pending = false;
            byte ^ ESCAPE_MASK
        } else {
            byte
        };

        let declared = match self.declared_len {
            Some(len) => len,
            None => {
                if byte as usize > MAX_PAYLOAD_SIZE {
                    log::debug!("frame length {} exceeds maximum {}", byte, MAX_PAYLOAD_SIZE);
                    metrics::counter!(metric_defs::FRAMES_DROPPED.name, "reason" => "oversize")
                        .increment(1);
                    self.resync();
                    return None;
                }
                self.declared_len = Some(byte);
                byte
            }
        };

        self.buffer.put_u8(byte);
        if self.buffer.len() < declared as usize + FRAME_OVERHEAD {
            return None;
        }

        let raw = self.buffer.split();
        self.resync();

        match Frame::from_raw_bytes(&raw) {
            Ok(frame) if frame.dest_addr == self.local_addr || frame.is_broadcast() => {
                metrics::counter!(metric_defs::FRAMES_RX.name).increment(1);
                Some(frame)
            }
            Ok(frame) => {
                log::trace!(
                    "dropping frame for link address {} (we are {})",
                    frame.dest_addr,
                    self.local_addr
                );
                metrics::counter!(metric_defs::FRAMES_DROPPED.name, "reason" => "not_for_us")
                    .increment(1);
                None
            }
            Err(e) => {
                log::debug!("dropping corrupted frame: {}", e);
                metrics::counter!(metric_defs::FRAMES_DROPPED.name, "reason" => "crc").increment(1);
                None
            }
        }
    }

    /// Feed a chunk of bytes, collecting every completed frame.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Get the number of bytes collected for the current frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame and wait for the next preamble.
    pub fn resync(&mut self) {
        self.buffer.clear();
        self.escape_pending = false;
        self.declared_len = None;
        self.awaiting_preamble = true;
    }

    fn restart(&mut self) {
        self.buffer.clear();
        self.escape_pending = false;
        self.declared_len = None;
        self.awaiting_preamble = false;
    }
}
