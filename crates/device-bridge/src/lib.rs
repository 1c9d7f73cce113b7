//! Droidfarm Device Bridge
//!
//! The seam between the agent and the device transport: the
//! [`DeviceBridge`] trait, its adb-backed implementation, the device model,
//! and the tracker that converts the bridge's notification stream into
//! typed events.

pub mod adb;
pub mod bridge;
pub mod device;
pub mod tracker;

pub use adb::AdbBridge;
pub use bridge::{BridgeError, DeviceBridge};
pub use device::{Device, DeviceEvent, DeviceKind, DeviceState};
pub use tracker::DeviceTracker;
