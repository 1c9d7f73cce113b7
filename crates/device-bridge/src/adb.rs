//! ADB-backed Device Bridge
//!
//! Drives devices through the `adb` binary. Subprocess execution is bounded
//! by a semaphore so a burst of registrations cannot fork an unbounded
//! number of adb processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::bridge::{BridgeError, DeviceBridge, Result};
use crate::device::{Device, DeviceState};

/// ADB client implementing the bridge primitives
pub struct AdbBridge {
    adb_path: PathBuf,
    command_slots: Arc<Semaphore>,
}

impl AdbBridge {
    /// Create a bridge with the shell pool sized to the host CPU count
    pub fn new(adb_path: PathBuf) -> Self {
        Self::with_concurrency(adb_path, num_cpus::get().max(2))
    }

    /// Create a bridge with an explicit shell pool size
    pub fn with_concurrency(adb_path: PathBuf, max_commands: usize) -> Self {
        Self {
            adb_path,
            command_slots: Arc::new(Semaphore::new(max_commands)),
        }
    }

    /// Check if the adb binary is present
    pub fn is_available(&self) -> bool {
        self.adb_path.exists()
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    /// Run an adb command
    async fn run(&self, args: &[&str]) -> Result<String> {
        if !self.adb_path.exists() {
            return Err(BridgeError::NotFound);
        }

        let _slot = self
            .command_slots
            .acquire()
            .await
            .map_err(|_| BridgeError::CommandFailed("command pool closed".into()))?;

        debug!("adb {:?}", args);

        let output = Command::new(&self.adb_path).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run an adb command against a specific device
    async fn run_for_device(&self, serial: &str, args: &[&str]) -> Result<String> {
        let mut full_args = vec!["-s", serial];
        full_args.extend(args);
        self.run(&full_args).await
    }

    /// Start the adb server
    pub async fn start_server(&self) -> Result<()> {
        self.run(&["start-server"]).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        let output = self.run(&["devices", "-l"]).await?;
        Ok(parse_devices_output(&output))
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        self.run_for_device(serial, &["shell", command]).await
    }

    async fn forward(&self, serial: &str, local_port: u16, remote_port: u16) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        let remote = format!("tcp:{}", remote_port);
        self.run_for_device(serial, &["forward", &local, &remote])
            .await?;
        Ok(())
    }

    async fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        match self
            .run_for_device(serial, &["forward", "--remove", &local])
            .await
        {
            Ok(_) => Ok(()),
            // Removing a forward that no longer exists is not a failure.
            Err(BridgeError::CommandFailed(msg)) if msg.contains("not found") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn install(&self, serial: &str, artifact: &Path) -> Result<()> {
        let path_str = artifact.to_string_lossy();
        self.run_for_device(serial, &["install", "-r", &path_str])
            .await?;
        Ok(())
    }

    async fn console_port(&self, serial: &str) -> Result<u16> {
        // Emulator serials encode the console port: emulator-5554 listens
        // on 5554.
        serial
            .strip_prefix("emulator-")
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| BridgeError::NoConsolePort(serial.to_string()))
    }
}

/// Parse `adb devices -l` output into devices
pub fn parse_devices_output(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("List of devices attached") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let mut device = Device::new(parts[0], DeviceState::parse(parts[1]));

        // Trailing columns are key:value annotations (model, product, ...)
        for part in parts.iter().skip(2) {
            if let Some((key, value)) = part.split_once(':') {
                device.properties.insert(key.to_string(), value.to_string());
            }
        }

        devices.push(device);
    }

    devices
}
