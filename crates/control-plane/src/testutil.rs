//! Test support: a mock device bridge backed by real loopback sockets.
//!
//! `forward` starts a stub companion server on the requested local port, so
//! channel and registry tests exercise the same socket path production
//! uses. Shell output is synthesized from a per-device property map.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use droidfarm_device_bridge::bridge::{BridgeError, DeviceBridge, Result};
use droidfarm_device_bridge::device::Device;

use crate::channel::{Request, RequestKind, Response};

/// How a stub companion on a given remote port behaves
#[derive(Debug, Clone)]
pub enum CompanionBehavior {
    /// Echo this marker for Validate; answer Query/Perform with their
    /// arguments reflected back
    Echo(String),
    /// Report every request as a companion-side failure
    Fail(String),
    /// Accept the connection, read the request, close without replying
    CloseWithoutReply,
}

pub struct MockBridge {
    devices: Mutex<Vec<Device>>,
    props: Mutex<HashMap<(String, String), String>>,
    installed: Mutex<HashSet<(String, String)>>,
    behaviors: Mutex<HashMap<u16, CompanionBehavior>>,
    listeners: Mutex<HashMap<u16, JoinHandle<()>>>,
    shell_log: Mutex<Vec<(String, String)>>,
    install_log: Mutex<Vec<(String, String)>>,
    forward_calls: AtomicUsize,
    fail_forward: AtomicBool,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            props: Mutex::new(HashMap::new()),
            installed: Mutex::new(HashSet::new()),
            behaviors: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            shell_log: Mutex::new(Vec::new()),
            install_log: Mutex::new(Vec::new()),
            forward_calls: AtomicUsize::new(0),
            fail_forward: AtomicBool::new(false),
        }
    }

    /// Register the stub behavior for a companion remote port
    pub fn serve_companion(&self, remote_port: u16, behavior: CompanionBehavior) {
        self.behaviors.lock().insert(remote_port, behavior);
    }

    /// Mark a device booted with the given API level and companion packages
    /// present
    pub fn device_ready(&self, serial: &str, api_level: u32, packages: &[&str]) {
        let mut props = self.props.lock();
        props.insert(
            (serial.to_string(), "init.svc.bootanim".to_string()),
            "stopped".to_string(),
        );
        props.insert(
            (serial.to_string(), "ro.build.version.sdk".to_string()),
            api_level.to_string(),
        );
        let mut installed = self.installed.lock();
        for package in packages {
            installed.insert((serial.to_string(), package.to_string()));
        }
    }

    pub fn set_prop(&self, serial: &str, prop: &str, value: &str) {
        self.props
            .lock()
            .insert((serial.to_string(), prop.to_string()), value.to_string());
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock() = devices;
    }

    pub fn fail_forwards(&self, fail: bool) {
        self.fail_forward.store(fail, Ordering::SeqCst);
    }

    pub fn forward_count(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub fn shell_calls(&self, serial: &str, prefix: &str) -> usize {
        self.shell_log
            .lock()
            .iter()
            .filter(|(s, cmd)| s == serial && cmd.starts_with(prefix))
            .count()
    }

    pub fn install_count(&self, serial: &str) -> usize {
        self.install_log.lock().iter().filter(|(s, _)| s == serial).count()
    }

    /// Listeners still serving forwarded ports
    pub fn active_listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    fn spawn_stub(behavior: CompanionBehavior, listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    let mut payload = Vec::new();
                    if stream.read_to_end(&mut payload).await.is_err() {
                        return;
                    }
                    let Ok(request) = serde_json::from_slice::<Request>(&payload) else {
                        return;
                    };
                    let response = match behavior {
                        CompanionBehavior::CloseWithoutReply => return,
                        CompanionBehavior::Fail(message) => Response::Failure(message),
                        CompanionBehavior::Echo(marker) => match request.kind {
                            RequestKind::Validate => {
                                Response::Result(serde_json::json!(marker))
                            }
                            RequestKind::Query => Response::Result(
                                serde_json::json!({"query": request.arguments}),
                            ),
                            RequestKind::Perform => Response::Result(
                                serde_json::json!({"performed": request.arguments}),
                            ),
                            RequestKind::Stop => Response::Result(serde_json::json!(null)),
                        },
                    };
                    let Ok(bytes) = serde_json::to_vec(&response) else {
                        return;
                    };
                    let _ = stream.write_all(&bytes).await;
                });
            }
        })
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBridge for MockBridge {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.lock().clone())
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        self.shell_log
            .lock()
            .push((serial.to_string(), command.to_string()));

        if let Some(prop) = command.strip_prefix("getprop ") {
            let value = self
                .props
                .lock()
                .get(&(serial.to_string(), prop.trim().to_string()))
                .cloned()
                .unwrap_or_default();
            return Ok(value);
        }

        if let Some(package) = command.strip_prefix("pm list packages ") {
            let package = package.trim();
            let present = self
                .installed
                .lock()
                .contains(&(serial.to_string(), package.to_string()));
            return Ok(if present {
                format!("package:{}\n", package)
            } else {
                String::new()
            });
        }

        Ok(String::new())
    }

    async fn forward(&self, _serial: &str, local_port: u16, remote_port: u16) -> Result<()> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_forward.load(Ordering::SeqCst) {
            return Err(BridgeError::CommandFailed("cannot bind".into()));
        }

        let behavior = self.behaviors.lock().get(&remote_port).cloned();
        let Some(behavior) = behavior else {
            // No companion registered: leave the port unbound so connects
            // are refused.
            return Ok(());
        };

        if self.listeners.lock().contains_key(&local_port) {
            return Ok(());
        }

        let listener = TcpListener::bind(("127.0.0.1", local_port))
            .await
            .map_err(BridgeError::Io)?;
        let handle = Self::spawn_stub(behavior, listener);
        self.listeners.lock().insert(local_port, handle);
        Ok(())
    }

    async fn remove_forward(&self, _serial: &str, local_port: u16) -> Result<()> {
        if let Some(handle) = self.listeners.lock().remove(&local_port) {
            handle.abort();
        }
        Ok(())
    }

    async fn install(&self, serial: &str, artifact: &Path) -> Result<()> {
        self.install_log.lock().push((
            serial.to_string(),
            artifact.to_string_lossy().to_string(),
        ));
        Ok(())
    }

    async fn console_port(&self, serial: &str) -> Result<u16> {
        serial
            .strip_prefix("emulator-")
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| BridgeError::NoConsolePort(serial.to_string()))
    }
}
