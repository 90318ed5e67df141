//! Per-node RPC dispatch.
//!
//! The first byte of every data packet is a command id. Command 0 identifies
//! the device:
//!
//! ```text
//! base -> device: [0, echo]
//! device -> base: [0, echo, device_type(4, LE), unique_id(4, LE)]
//! ```
//!
//! Every other command is handled by the [`Device`] bound to the node.

use std::sync::Arc;

use meshnet_metrics::metric_defs;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::controller::WeakController;
use crate::device::{Device, DeviceRegistry};
use crate::{RpcError, SendError};

/// Command id of the identify exchange.
pub const IDENTIFY_COMMAND: u8 = 0;

/// Byte the device must echo back in its identify reply.
pub const IDENTIFY_ECHO: u8 = 45;

/// Payload of an identify request.
pub const IDENTIFY_REQUEST: [u8; 2] = [IDENTIFY_COMMAND, IDENTIFY_ECHO];

/// Identify reply size after the command byte.
const IDENTIFY_REPLY_LEN: usize = 1 + 4 + 4;

/// RPC endpoint for one node of a tree.
#[derive(Debug)]
pub struct RpcDispatcher {
    address: u8,
    controller: WeakController,
    registry: Arc<DeviceRegistry>,
    device: Mutex<Option<Arc<Device>>>,
}

impl RpcDispatcher {
    pub(crate) fn new(address: u8, controller: WeakController, registry: Arc<DeviceRegistry>) -> Self {
        RpcDispatcher {
            address,
            controller,
            registry,
            device: Mutex::new(None),
        }
    }

    /// Mesh address of the node.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Device bound by the last identify reply.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.lock().clone()
    }

    /// Handle the payload of a data packet from the node.
    pub fn on_packet_received(self: &Arc<Self>, data: &[u8]) -> Result<(), RpcError> {
        let Some((&command, args)) = data.split_first() else {
            return Err(RpcError::EmptyPacket);
        };

        if command == IDENTIFY_COMMAND {
            return self.on_identify(args);
        }

        let Some(device) = self.device() else {
            metrics::counter!(metric_defs::RPC_DROPPED.name, "reason" => "unidentified")
                .increment(1);
            return Err(RpcError::Unidentified {
                address: self.address,
                command,
            });
        };
        device.handle_command(command, args).map_err(|e| {
            metrics::counter!(metric_defs::RPC_DROPPED.name, "reason" => "unknown_command")
                .increment(1);
            RpcError::from(e)
        })
    }

    fn on_identify(self: &Arc<Self>, args: &[u8]) -> Result<(), RpcError> {
        if args.len() < IDENTIFY_REPLY_LEN {
            return Err(RpcError::InvalidPayload {
                command: IDENTIFY_COMMAND,
                expected: IDENTIFY_REPLY_LEN,
                actual: args.len(),
            });
        }

        let echo = args[0];
        if echo != IDENTIFY_ECHO {
            warn!("Wrong identify echo from address {}: {}", self.address, echo);
        }
        let device_type = u32::from_le_bytes([args[1], args[2], args[3], args[4]]);
        let unique_id = u32::from_le_bytes([args[5], args[6], args[7], args[8]]);

        let device = self.registry.get_or_create(device_type, unique_id);
        device.bind(self);
        info!(
            "Address {} is {} device {:#010x}",
            self.address,
            device.kind(),
            unique_id
        );
        *self.device.lock() = Some(device);
        Ok(())
    }

    /// Send `command` with `data` to the node.
    pub fn send_command_request(&self, command: u8, data: &[u8]) -> Result<(), SendError> {
        let controller = self.controller.upgrade().ok_or(SendError::ControllerGone)?;
        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(command);
        payload.extend_from_slice(data);
        debug!("Command {} to address {}", command, self.address);
        controller.send_data_to_device(self.address, &payload)
    }

    /// Ask the node to identify itself.
    pub fn send_identify_request(&self) -> Result<(), SendError> {
        let controller = self.controller.upgrade().ok_or(SendError::ControllerGone)?;
        controller.send_data_to_device(self.address, &IDENTIFY_REQUEST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceKind, LED_LAMP_TYPE};

    fn dispatcher(registry: &Arc<DeviceRegistry>) -> Arc<RpcDispatcher> {
        Arc::new(RpcDispatcher::new(
            3,
            WeakController(std::sync::Weak::new()),
            registry.clone(),
        ))
    }

    fn identify_reply(echo: u8, device_type: u32, unique_id: u32) -> Vec<u8> {
        let mut data = vec![IDENTIFY_COMMAND, echo];
        data.extend_from_slice(&device_type.to_le_bytes());
        data.extend_from_slice(&unique_id.to_le_bytes());
        data
    }

    #[test]
    fn test_identify_binds_device() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = dispatcher(&registry);

        dispatcher
            .on_packet_received(&identify_reply(IDENTIFY_ECHO, LED_LAMP_TYPE, 0xCAFE))
            .unwrap();

        let device = dispatcher.device().unwrap();
        assert_eq!(device.unique_id(), 0xCAFE);
        assert_eq!(device.kind(), DeviceKind::LedLamp);
        assert_eq!(device.address(), Some(3));
        assert!(Arc::ptr_eq(&registry.get(0xCAFE).unwrap(), &device));
    }

    #[test]
    fn test_wrong_echo_is_not_fatal() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = dispatcher(&registry);
        dispatcher
            .on_packet_received(&identify_reply(44, 1, 2))
            .unwrap();
        assert!(dispatcher.device().is_some());
    }

    #[test]
    fn test_short_identify() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = dispatcher(&registry);
        let mut reply = identify_reply(IDENTIFY_ECHO, 1, 2);
        reply.pop();
        assert!(matches!(
            dispatcher.on_packet_received(&reply),
            Err(RpcError::InvalidPayload {
                command: 0,
                expected: 9,
                actual: 8
            })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_command_before_identify_dropped() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = dispatcher(&registry);
        assert!(matches!(
            dispatcher.on_packet_received(&[1, 2, 3]),
            Err(RpcError::Unidentified {
                address: 3,
                command: 1
            })
        ));
        assert!(matches!(
            dispatcher.on_packet_received(&[]),
            Err(RpcError::EmptyPacket)
        ));
    }

    #[test]
    fn test_unknown_command() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = dispatcher(&registry);
        dispatcher
            .on_packet_received(&identify_reply(IDENTIFY_ECHO, LED_LAMP_TYPE, 1))
            .unwrap();
        assert!(matches!(
            dispatcher.on_packet_received(&[9]),
            Err(RpcError::UnknownCommand(crate::UnknownCommand(9)))
        ));
        dispatcher.on_packet_received(&[1, 10, 20, 30, 40, 50]).unwrap();
    }

    #[test]
    fn test_send_without_controller() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = dispatcher(&registry);
        assert!(matches!(
            dispatcher.send_identify_request(),
            Err(SendError::ControllerGone)
        ));
    }
}
