//! Component Communicators
//!
//! Typed façades over the request channel, one per companion process, plus
//! the per-device bundle the registry publishes.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use droidfarm_device_bridge::{DeviceBridge, DeviceKind};

use crate::channel::{Request, RequestChannel, RequestKind};
use crate::error::Result;

/// Static description of one companion process
#[derive(Debug, Clone)]
pub struct CompanionSpec {
    /// Short name used in logs and errors
    pub name: &'static str,
    /// Package the companion is installed under
    pub package: String,
    /// Install artifact file name, resolved against the companion directory
    pub artifact: String,
    /// Shell command that starts the companion (must return promptly)
    pub launch_command: String,
    /// Shell command that stops the companion
    pub stop_command: String,
    /// Port the companion listens on, on the device
    pub remote_port: u16,
    /// Marker the companion echoes during the validation handshake
    pub validation_marker: String,
}

impl CompanionSpec {
    /// The device-service companion: property queries and device actions
    pub fn service() -> Self {
        Self {
            name: "service",
            package: "dev.droidfarm.service".into(),
            artifact: "droidfarm-service.apk".into(),
            launch_command:
                "am startservice -n dev.droidfarm.service/.ControlService".into(),
            stop_command: "am force-stop dev.droidfarm.service".into(),
            remote_port: 10090,
            validation_marker: "droidfarm-service".into(),
        }
    }

    /// The UI-automation companion
    pub fn automation() -> Self {
        Self {
            name: "automation",
            package: "dev.droidfarm.automation".into(),
            artifact: "droidfarm-automation.apk".into(),
            launch_command:
                "am instrument -e port 10080 dev.droidfarm.automation/.AutomationRunner"
                    .into(),
            stop_command: "am force-stop dev.droidfarm.automation".into(),
            remote_port: 10080,
            validation_marker: "droidfarm-automation".into(),
        }
    }

    /// Install artifact path under the configured companion directory
    pub fn artifact_path(&self, companion_dir: &std::path::Path) -> PathBuf {
        companion_dir.join(&self.artifact)
    }
}

/// Façade over the device-service companion
pub struct ServiceCommunicator {
    channel: RequestChannel,
}

impl ServiceCommunicator {
    pub fn new(channel: RequestChannel) -> Self {
        Self { channel }
    }

    /// Validation handshake against the service marker
    pub async fn validate(&self, marker: &str) -> Result<()> {
        self.channel.validate("service", marker).await
    }

    /// Read-only device detail lookup
    pub async fn query(&self, what: &str) -> Result<Value> {
        self.channel
            .request(&Request::new(RequestKind::Query, vec![json!(what)]))
            .await
    }

    /// Run a device-service action
    pub async fn perform(&self, action: &str, arguments: Vec<Value>) -> Result<Value> {
        let mut args = vec![json!(action)];
        args.extend(arguments);
        self.channel
            .request(&Request::new(RequestKind::Perform, args))
            .await
    }

    pub fn local_port(&self) -> u16 {
        self.channel.local_port()
    }

    pub async fn stop(&self) {
        self.channel.stop().await;
    }
}

/// Façade over the UI-automation companion
pub struct AutomationCommunicator {
    channel: RequestChannel,
}

impl AutomationCommunicator {
    pub fn new(channel: RequestChannel) -> Self {
        Self { channel }
    }

    /// Validation handshake against the automation marker
    pub async fn validate(&self, marker: &str) -> Result<()> {
        self.channel.validate("automation", marker).await
    }

    /// Capture the current UI hierarchy
    pub async fn dump_hierarchy(&self) -> Result<Value> {
        self.channel
            .request(&Request::new(RequestKind::Query, vec![json!("hierarchy")]))
            .await
    }

    /// Drive one automation gesture or action
    pub async fn perform(&self, action: &str, arguments: Vec<Value>) -> Result<Value> {
        let mut args = vec![json!(action)];
        args.extend(arguments);
        self.channel
            .request(&Request::new(RequestKind::Perform, args))
            .await
    }

    pub fn local_port(&self) -> u16 {
        self.channel.local_port()
    }

    pub async fn stop(&self) {
        self.channel.stop().await;
    }
}

/// Everything the agent publishes for one registered device
pub struct DeviceCommunicator {
    serial: String,
    kind: DeviceKind,
    bridge: Arc<dyn DeviceBridge>,
    service: ServiceCommunicator,
    automation: AutomationCommunicator,
    stop_commands: Vec<String>,
}

impl DeviceCommunicator {
    pub fn new(
        serial: impl Into<String>,
        kind: DeviceKind,
        bridge: Arc<dyn DeviceBridge>,
        service: ServiceCommunicator,
        automation: AutomationCommunicator,
        stop_commands: Vec<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            kind,
            bridge,
            service,
            automation,
            stop_commands,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn service(&self) -> &ServiceCommunicator {
        &self.service
    }

    pub fn automation(&self) -> &AutomationCommunicator {
        &self.automation
    }

    /// Local ports currently bound for this device
    pub fn local_ports(&self) -> [u16; 2] {
        [self.service.local_port(), self.automation.local_port()]
    }

    /// Graceful shutdown: stop companion processes best-effort, then stop
    /// both channels (which releases their ports).
    pub async fn shutdown(&self) {
        for command in &self.stop_commands {
            if let Err(err) = self.bridge.shell(&self.serial, command).await {
                warn!(
                    serial = %self.serial,
                    command = %command,
                    error = %err,
                    "failed to stop companion process"
                );
            }
        }

        self.service.stop().await;
        self.automation.stop().await;
        debug!(serial = %self.serial, "communicator shut down");
    }
}
