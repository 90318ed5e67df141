//! Error types for meshnet-base.

use std::io;

use thiserror::Error;

use meshnet_frame::FrameError;

use crate::link::LinkId;

/// Violations of the topology tree's structure. All of them are fatal to the
/// discovery round that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// A response contradicts what the tree already recorded.
    #[error("Inconsistent topology: {0}")]
    InconsistentTopology(String),

    /// Structural change after addresses were calculated.
    #[error("Tree already finalized, cannot add node {nonce:#010x}")]
    AlreadyFinalized {
        /// Nonce of the rejected node.
        nonce: u32,
    },

    /// More reachable nodes than mesh addresses.
    #[error("Address space exhausted: {nodes} reachable nodes (max {max})")]
    AddressSpaceExhausted {
        /// Reachable node count.
        nodes: usize,
        /// Number of available addresses.
        max: usize,
    },
}

impl TreeError {
    /// Create an inconsistent topology error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        TreeError::InconsistentTopology(message.into())
    }
}

/// Errors from sending a packet toward a device.
#[derive(Debug, Error)]
pub enum SendError {
    /// No root of the active tree covers the address.
    #[error("No route to address {0}")]
    UnroutableAddress(u8),

    /// The link id does not name an attached link.
    #[error("Unknown link {0}")]
    UnknownLink(LinkId),

    /// Payload does not fit in a frame.
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    /// The transport failed to write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The controller was dropped.
    #[error("Network controller is gone")]
    ControllerGone,
}

/// Errors that end a discovery round.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Another round is already running.
    #[error("A discovery round is already in progress")]
    DiscoveryInProgress,

    /// The candidate tree became inconsistent.
    #[error(transparent)]
    Topology(#[from] TreeError),

    /// The round was cancelled.
    #[error("Discovery cancelled")]
    Cancelled,

    /// The discovery task panicked or was aborted.
    #[error("Discovery task failed: {0}")]
    TaskFailed(String),
}

/// A device command that the device kind does not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unknown command {0}")]
pub struct UnknownCommand(pub u8);

/// Errors from the RPC layer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// A data packet without a command byte.
    #[error("Empty RPC packet")]
    EmptyPacket,

    /// Command payload has the wrong size.
    #[error("Invalid payload for command {command}: expected {expected} bytes, got {actual}")]
    InvalidPayload {
        /// Command id.
        command: u8,
        /// Required payload length.
        expected: usize,
        /// Received payload length.
        actual: usize,
    },

    /// A command arrived before the node identified itself.
    #[error("Command {command} from unidentified node {address}")]
    Unidentified {
        /// Mesh address of the node.
        address: u8,
        /// Command id.
        command: u8,
    },

    /// The device is not reachable through any dispatcher.
    #[error("Device {0:#010x} is not bound to a node")]
    Unbound(u32),

    /// Command not supported by the device kind.
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),

    /// Sending failed.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),

    /// The YAML did not parse.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TreeError::AlreadyFinalized { nonce: 42 };
        assert!(err.to_string().contains("0x0000002a"));

        let err: DiscoveryError = TreeError::inconsistent("self edge").into();
        assert_eq!(err.to_string(), "Inconsistent topology: self edge");

        let err: RpcError = UnknownCommand(7).into();
        assert_eq!(err.to_string(), "Unknown command 7");

        assert_eq!(SendError::UnroutableAddress(9).to_string(), "No route to address 9");
    }
}
