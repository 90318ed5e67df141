//! MeshNet base station
//!
//! The base discovers the devices of a tree-shaped mesh, gives each one a
//! mesh address, routes data packets to and from them, and binds every
//! device that identifies itself to a long-lived [`Device`] handle.
//!
//! ## Architecture
//!
//! ```text
//! Transport bytes -> SerialLink (FrameDecoder) -> NetworkController
//!                                                   |-- beacon responses -> candidate TopologyTree
//!                                                   `-- DataToBase -> RpcDispatcher -> Device
//! Device / RpcDispatcher -> NetworkController::send_data_to_device -> active tree route -> link
//! ```
//!
//! A discovery round (see [`NetworkController::start_discovery`]) runs as a
//! tokio task. It beacons every link, waits for responses, assigns addresses
//! with bounded retransmission, and promotes the candidate tree to active.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshnet_base::{DeviceRegistry, NetworkConfig, NetworkController, Transport};
//!
//! struct Stdout;
//! impl Transport for Stdout {
//!     fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
//!         println!("{:02x?}", bytes);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = NetworkController::new(NetworkConfig::default(), Arc::new(DeviceRegistry::new()));
//! let link = controller.attach_link_random_addr(Stdout);
//! // A receiver loop calls controller.on_bytes_received(link, &bytes).
//! let report = controller.start_discovery()?.join().await?;
//! println!("{} nodes addressed", report.addressed);
//! # let _ = link;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod config;
mod controller;
pub mod device;
mod discovery;
mod error;
mod link;
pub mod rpc;
pub mod tree;

pub use cancel::{CancelToken, Cancelled};
pub use config::NetworkConfig;
pub use controller::{NetworkController, WeakController};
pub use device::{Device, DeviceKind, DeviceRegistry};
pub use discovery::{DiscoveryHandle, DiscoveryReport};
pub use error::*;
pub use link::{random_link_addr, LinkId, SerialLink, Transport};
pub use rpc::RpcDispatcher;
pub use tree::{NodeSummary, TopologyTree};
