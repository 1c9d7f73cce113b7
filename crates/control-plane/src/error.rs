//! Control-plane error taxonomy
//!
//! Every failure mode here is contained to one device or one companion
//! process; none of them may corrupt the registry map or leak an allocated
//! port.

use thiserror::Error;

use droidfarm_device_bridge::BridgeError;

use crate::ports::PortError;

/// Control-plane errors
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Ports(#[from] PortError),

    #[error("Forwarding failed for device {serial}: {source}")]
    ForwardingFailed {
        serial: String,
        #[source]
        source: BridgeError,
    },

    #[error("Validation failed for {companion} on device {serial}: {reason}")]
    ValidationFailed {
        serial: String,
        companion: String,
        reason: String,
    },

    #[error("Request to device {serial} failed after {attempts} attempts: {last_error}")]
    Transport {
        serial: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Companion on device {serial} reported failure: {message}")]
    CompanionFailure { serial: String, message: String },

    #[error("Companion {companion} is not installed on device {serial} and automatic setup is disabled")]
    CompanionMissing { serial: String, companion: String },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Bridge error on device {serial}: {source}")]
    Bridge {
        serial: String,
        #[source]
        source: BridgeError,
    },

    #[error("Channel for device {0} is stopped")]
    ChannelStopped(String),
}

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, ControlPlaneError>;
