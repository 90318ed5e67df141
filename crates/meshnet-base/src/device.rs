//! Devices and the device registry.
//!
//! A [`Device`] is a physical device, identified by its unique id, that
//! outlives any one topology tree. After every discovery round its node
//! identifies itself again and the device is rebound to the new node's
//! dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::rpc::RpcDispatcher;
use crate::{RpcError, UnknownCommand};

/// Device type of the RGBAW LED lamp.
pub const LED_LAMP_TYPE: u32 = 91235;

/// Device type of the single-LED board.
pub const LED_BOARD_TYPE: u32 = 123;

/// RGBAW lamp: set the five LED PWM duty cycles.
pub const SET_RGBAW_PWM_COMMAND: u8 = 1;

/// LED board: switch the LED on or off.
pub const SET_LED_STATE_COMMAND: u8 = 1;

/// LED board: set the analog LED PWM duty cycle.
pub const SET_LED_PWM_COMMAND: u8 = 2;

/// Known device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// High-power RGBAW LED lamp.
    LedLamp,
    /// Board with one LED that can be switched or dimmed.
    LedBoard,
    /// Any other device type; every command is accepted.
    Generic,
}

impl DeviceKind {
    /// Kind for a device type reported by identify.
    pub fn from_device_type(device_type: u32) -> Self {
        match device_type {
            LED_LAMP_TYPE => DeviceKind::LedLamp,
            LED_BOARD_TYPE => DeviceKind::LedBoard,
            _ => DeviceKind::Generic,
        }
    }

    /// Whether the kind implements `command`.
    pub fn supports(&self, command: u8) -> bool {
        match self {
            DeviceKind::LedLamp => command == SET_RGBAW_PWM_COMMAND,
            DeviceKind::LedBoard => {
                command == SET_LED_STATE_COMMAND || command == SET_LED_PWM_COMMAND
            }
            DeviceKind::Generic => true,
        }
    }

    /// Short name.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::LedLamp => "led-lamp",
            DeviceKind::LedBoard => "led-board",
            DeviceKind::Generic => "generic",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// PWM duty cycles for the five LED colors of a lamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbawPwm {
    /// Red duty cycle.
    pub red: u8,
    /// Green duty cycle.
    pub green: u8,
    /// Blue duty cycle.
    pub blue: u8,
    /// Amber duty cycle.
    pub amber: u8,
    /// White duty cycle.
    pub white: u8,
}

impl RgbawPwm {
    fn to_bytes(self) -> [u8; 5] {
        [self.red, self.green, self.blue, self.amber, self.white]
    }
}

/// Last command a device sent to the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    /// Command id.
    pub command: u8,
    /// Arguments after the command byte.
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct DeviceState {
    dispatcher: Weak<RpcDispatcher>,
    last_report: Option<CommandReport>,
}

/// A physical device.
#[derive(Debug)]
pub struct Device {
    unique_id: u32,
    device_type: u32,
    kind: DeviceKind,
    state: Mutex<DeviceState>,
}

impl Device {
    fn new(device_type: u32, unique_id: u32) -> Self {
        Device {
            unique_id,
            device_type,
            kind: DeviceKind::from_device_type(device_type),
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Unique id reported by identify.
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Raw device type reported by identify.
    pub fn device_type(&self) -> u32 {
        self.device_type
    }

    /// Kind derived from the device type.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Dispatcher of the node the device was last seen on, if that tree is
    /// still alive.
    pub fn dispatcher(&self) -> Option<Arc<RpcDispatcher>> {
        self.state.lock().dispatcher.upgrade()
    }

    /// Current mesh address.
    pub fn address(&self) -> Option<u8> {
        self.dispatcher().map(|d| d.address())
    }

    pub(crate) fn bind(&self, dispatcher: &Arc<RpcDispatcher>) {
        self.state.lock().dispatcher = Arc::downgrade(dispatcher);
    }

    /// Last command received from the device.
    pub fn last_report(&self) -> Option<CommandReport> {
        self.state.lock().last_report.clone()
    }

    /// Handle a command sent by the device.
    pub fn handle_command(&self, command: u8, data: &[u8]) -> Result<(), UnknownCommand> {
        if !self.kind.supports(command) {
            debug!(
                "{} device {:#010x} sent unknown command {}",
                self.kind, self.unique_id, command
            );
            return Err(UnknownCommand(command));
        }
        self.state.lock().last_report = Some(CommandReport {
            command,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Send a command to the device through its current node.
    pub fn send_command(&self, command: u8, data: &[u8]) -> Result<(), RpcError> {
        let dispatcher = self.dispatcher().ok_or(RpcError::Unbound(self.unique_id))?;
        dispatcher.send_command_request(command, data)?;
        Ok(())
    }

    /// Set the five LED duty cycles of a lamp.
    pub fn set_rgbaw_pwm(&self, pwm: RgbawPwm) -> Result<(), RpcError> {
        if self.kind != DeviceKind::LedLamp {
            return Err(UnknownCommand(SET_RGBAW_PWM_COMMAND).into());
        }
        self.send_command(SET_RGBAW_PWM_COMMAND, &pwm.to_bytes())
    }

    /// Switch the LED of an LED board.
    pub fn set_led_state(&self, on: bool) -> Result<(), RpcError> {
        if self.kind != DeviceKind::LedBoard {
            return Err(UnknownCommand(SET_LED_STATE_COMMAND).into());
        }
        self.send_command(SET_LED_STATE_COMMAND, &[u8::from(on)])
    }

    /// Set the analog PWM duty cycle of an LED board.
    pub fn set_led_pwm(&self, duty: u8) -> Result<(), RpcError> {
        if self.kind != DeviceKind::LedBoard {
            return Err(UnknownCommand(SET_LED_PWM_COMMAND).into());
        }
        self.send_command(SET_LED_PWM_COMMAND, &[duty])
    }
}

/// Devices by unique id, shared by every dispatcher of every tree.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<u32, Arc<Device>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the device with `unique_id`, creating it on first sight.
    ///
    /// A device that reports a different type than before is replaced.
    pub fn get_or_create(&self, device_type: u32, unique_id: u32) -> Arc<Device> {
        let mut devices = self.devices.lock();
        if let Some(device) = devices.get(&unique_id) {
            if device.device_type == device_type {
                return device.clone();
            }
            warn!(
                "Device {:#010x} changed type from {} to {}",
                unique_id, device.device_type, device_type
            );
        }
        let device = Arc::new(Device::new(device_type, unique_id));
        devices.insert(unique_id, device.clone());
        device
    }

    /// Look up a device.
    pub fn get(&self, unique_id: u32) -> Option<Arc<Device>> {
        self.devices.lock().get(&unique_id).cloned()
    }

    /// All devices, ordered by unique id.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.devices.lock().values().cloned().collect();
        devices.sort_by_key(|d| d.unique_id);
        devices
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    /// Whether no device has identified yet.
    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}
