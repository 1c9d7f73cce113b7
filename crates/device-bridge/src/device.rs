//! Device Types and State
//!
//! Represents farm devices (real hardware and emulator instances).

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Property key the device reports its API level under
pub const PROP_API_LEVEL: &str = "ro.build.version.sdk";

/// Property key for the device manufacturer
pub const PROP_MANUFACTURER: &str = "ro.product.manufacturer";

/// Device state as reported by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Device is online and ready
    Online,
    /// Device is offline
    Offline,
    /// Device is not authorized (needs acceptance on device)
    Unauthorized,
    /// Unknown state
    Unknown,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Unknown => "unknown",
        }
    }

    /// Parse the state column of `adb devices` output
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            _ => DeviceState::Unknown,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, DeviceState::Online)
    }
}

/// Device kind; emulator-only capabilities are gated on this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Emulator instance reachable through its console port
    Emulator,
    /// Physical device connected via USB/WiFi
    RealDevice,
}

/// A device as observed through the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Stable serial number, the identity used everywhere in the agent
    pub serial: String,
    /// Reported state
    pub state: DeviceState,
    /// Emulator or real hardware
    pub kind: DeviceKind,
    /// Property bag (API level, manufacturer, density, ...)
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Device {
    /// Build a device from a serial and state, inferring the kind
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        let serial = serial.into();
        let kind = if serial.starts_with("emulator-") {
            DeviceKind::Emulator
        } else {
            DeviceKind::RealDevice
        };
        Self {
            serial,
            state,
            kind,
            properties: HashMap::new(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    pub fn is_emulator(&self) -> bool {
        self.kind == DeviceKind::Emulator
    }

    /// API level from the property bag, if known
    pub fn api_level(&self) -> Option<u32> {
        self.properties.get(PROP_API_LEVEL)?.trim().parse().ok()
    }

    /// Human-readable identity for logs
    pub fn display_name(&self) -> String {
        match self.properties.get("model") {
            Some(model) => format!("{} ({})", model.replace('_', " "), self.serial),
            None => self.serial.clone(),
        }
    }
}

/// A connectivity notification from the bridge
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Device appeared
    Connected(Device),
    /// Device went away
    Disconnected(Device),
    /// Device properties or state changed
    Changed(Device),
}

impl DeviceEvent {
    pub fn device(&self) -> &Device {
        match self {
            DeviceEvent::Connected(d) | DeviceEvent::Disconnected(d) | DeviceEvent::Changed(d) => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_kind_from_serial() {
        let emulator = Device::new("emulator-5554", DeviceState::Online);
        assert_eq!(emulator.kind, DeviceKind::Emulator);

        let phone = Device::new("0123456789ABCDEF", DeviceState::Online);
        assert_eq!(phone.kind, DeviceKind::RealDevice);
    }

    #[test]
    fn api_level_parses_from_properties() {
        let mut device = Device::new("emulator-5554", DeviceState::Online);
        assert_eq!(device.api_level(), None);

        device.properties.insert(PROP_API_LEVEL.into(), "25\n".into());
        assert_eq!(device.api_level(), Some(25));

        device.properties.insert(PROP_API_LEVEL.into(), "garbage".into());
        assert_eq!(device.api_level(), None);
    }

    #[test]
    fn only_online_is_usable() {
        assert!(DeviceState::Online.is_usable());
        assert!(!DeviceState::Offline.is_usable());
        assert!(!DeviceState::Unauthorized.is_usable());
    }
}
