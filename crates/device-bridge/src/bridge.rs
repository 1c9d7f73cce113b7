//! Device Bridge Trait
//!
//! The seam between the control plane and whatever transports device
//! commands (adb in production, mocks in tests). Implementations must be
//! `Send + Sync`; registration tasks call them concurrently.

use std::path::Path;
use async_trait::async_trait;

use crate::device::Device;

/// Bridge errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Device bridge not found")]
    NotFound,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Bridge command failed: {0}")]
    CommandFailed(String),
    #[error("No console port for device {0}")]
    NoConsolePort(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Primitives the agent consumes from the device bridge
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Enumerate currently known devices
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Run a shell command on the device and collect its text output
    async fn shell(&self, serial: &str, command: &str) -> Result<String>;

    /// Create a local→remote TCP port forward for the device
    async fn forward(&self, serial: &str, local_port: u16, remote_port: u16) -> Result<()>;

    /// Remove a previously created forward; absent forwards are not an error
    async fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()>;

    /// Install a package artifact on the device
    async fn install(&self, serial: &str, artifact: &Path) -> Result<()>;

    /// Console port of an emulator instance
    async fn console_port(&self, serial: &str) -> Result<u16>;

    /// Read a single system property
    async fn get_prop(&self, serial: &str, prop: &str) -> Result<String> {
        let output = self.shell(serial, &format!("getprop {}", prop)).await?;
        Ok(output.trim().to_string())
    }
}
