//! Framing error types.

use thiserror::Error;

/// Errors that can occur when building or validating a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload does not fit in a single frame.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Raw frame is shorter than the fixed overhead.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Length byte disagrees with the number of bytes carried.
    #[error("length mismatch: header declares {declared} payload bytes, frame carries {actual}")]
    LengthMismatch {
        /// Payload length from the header byte.
        declared: usize,
        /// Payload length actually present.
        actual: usize,
    },

    /// CRC check failed.
    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch {
        /// CRC computed over the received bytes.
        computed: u16,
        /// CRC carried in the frame trailer.
        received: u16,
    },
}
