//! Droidfarm Control Plane
//!
//! Device connectivity and lifecycle: the port pool, per-device forwarding,
//! the retrying request channel to on-device companion processes, the
//! device registry, and the change handler that drives it all from bridge
//! notifications.

pub mod channel;
pub mod communicator;
pub mod error;
pub mod forward;
pub mod handler;
pub mod ports;
pub mod registry;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::{Request, RequestChannel, RequestKind, Response};
pub use communicator::{
    AutomationCommunicator, CompanionSpec, DeviceCommunicator, ServiceCommunicator,
};
pub use error::{ControlPlaneError, Result};
pub use forward::PortForwarder;
pub use handler::{DeviceAction, DeviceChangeHandler, PendingDevices};
pub use ports::{PortAllocator, PortError};
pub use registry::{
    ConsolePrimer, DeviceListNotifier, DeviceRegistry, EventBusNotifier, RegisteredDevice,
};
