//! MeshNet base station runner.
//!
//! Serial devices are reached through TCP bridges (for example `ser2net` or
//! a microcontroller's Wi-Fi UART bridge). Each bridge becomes one link of
//! the [`meshnet_base::NetworkController`].

pub mod report;
pub mod tcp_link;

use thiserror::Error;

/// Errors that stop the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] meshnet_base::ConfigError),

    /// A link could not be opened.
    #[error("Link {addr}: {source}")]
    Link {
        /// Bridge address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Discovery failed in a way that cannot be retried.
    #[error(transparent)]
    Discovery(#[from] meshnet_base::DiscoveryError),

    /// The Ctrl-C handler could not be installed.
    #[error("Signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// The async runtime could not start.
    #[error("Runtime: {0}")]
    Runtime(std::io::Error),

    /// The metrics exporter could not start.
    #[error("Metrics: {0}")]
    Metrics(String),
}
