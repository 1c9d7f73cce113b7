//! Device Change Handler
//!
//! Consumes connect/disconnect/update notifications and drives registry
//! transitions. Every action runs as its own spawned task so a slow
//! registration never blocks delivery of later hardware events; the pending
//! set guarantees at most one lifecycle transition per serial at a time.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use droidfarm_device_bridge::{Device, DeviceEvent};

use crate::registry::DeviceRegistry;

/// Lifecycle transition requested for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Connect,
    Disconnect,
}

/// Serial numbers with a lifecycle transition currently in flight
pub struct PendingDevices {
    inner: Mutex<HashSet<String>>,
}

impl PendingDevices {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashSet::new()),
        }
    }

    /// Claim a serial with a check-then-add under the set's lock. Returns
    /// `None` when another task already holds the claim. The claim is
    /// released when the guard drops, on every exit path of the task.
    pub fn try_claim(self: Arc<Self>, serial: &str) -> Option<PendingClaim> {
        {
            let mut inner = self.inner.lock();
            if inner.contains(serial) {
                return None;
            }
            inner.insert(serial.to_string());
        }
        Some(PendingClaim {
            set: self,
            serial: serial.to_string(),
        })
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.inner.lock().contains(serial)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for PendingDevices {
    fn default() -> Self {
        Self::new()
    }
}

/// Claim on one serial in the pending set
pub struct PendingClaim {
    set: Arc<PendingDevices>,
    serial: String,
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        self.set.inner.lock().remove(&self.serial);
    }
}

/// Dispatches device actions onto spawned tasks
pub struct DeviceChangeHandler {
    registry: Arc<DeviceRegistry>,
    pending: Arc<PendingDevices>,
}

impl DeviceChangeHandler {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            pending: Arc::new(PendingDevices::new()),
        }
    }

    pub fn pending(&self) -> &Arc<PendingDevices> {
        &self.pending
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Dispatch one action as an independent task. The handle is returned
    /// for callers that need to await completion; dropping it detaches the
    /// task.
    pub fn handle_action(&self, action: DeviceAction, device: Device) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            let serial = device.serial.clone();

            match action {
                DeviceAction::Connect => {
                    if !device.is_usable() {
                        debug!(serial = %serial, state = ?device.state, "ignoring offline device");
                        return;
                    }

                    let Some(_claim) = Arc::clone(&pending).try_claim(&serial) else {
                        debug!(serial = %serial, "transition already in flight, dropping connect");
                        return;
                    };

                    if let Err(err) = registry.register_device(&device).await {
                        error!(serial = %serial, error = %err, "device registration failed");
                    }
                }
                DeviceAction::Disconnect => {
                    let Some(_claim) = Arc::clone(&pending).try_claim(&serial) else {
                        // The tracker re-emits the disconnect with its next
                        // snapshot, which converges the registry.
                        warn!(serial = %serial, "transition already in flight, dropping disconnect");
                        return;
                    };

                    if let Err(err) = registry.unregister_device(&serial).await {
                        error!(serial = %serial, error = %err, "device unregistration failed");
                    }
                }
            }
        })
    }

    /// Dispatcher loop: consume bridge events until the channel closes or
    /// the token cancels. Each event is dispatched without awaiting its
    /// task.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
        cancel: CancellationToken,
    ) {
        info!("device change handler running");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                DeviceEvent::Connected(device) => {
                    self.handle_action(DeviceAction::Connect, device);
                }
                DeviceEvent::Disconnected(device) => {
                    self.handle_action(DeviceAction::Disconnect, device);
                }
                // A state flip arrives as a change; route it by the
                // reported online state.
                DeviceEvent::Changed(device) => {
                    let action = if device.is_usable() {
                        DeviceAction::Connect
                    } else {
                        DeviceAction::Disconnect
                    };
                    self.handle_action(action, device);
                }
            }
        }
        info!("device change handler stopped");
    }
}
