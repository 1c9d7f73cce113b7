//! Device Registry
//!
//! The single source of truth for which devices are usable right now. A
//! serial number appears in the map if and only if its companion processes
//! were validated and their communicator is live. Registration performs real
//! I/O (boot wait, companion install, forwarding, validation) and rolls back
//! whatever was partially set up on any failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use droidfarm_core::config::{ChannelConfig, DeviceConfig};
use droidfarm_core::events::{Event, EventBus};
use droidfarm_device_bridge::device::PROP_API_LEVEL;
use droidfarm_device_bridge::{Device, DeviceBridge, DeviceKind};

use crate::channel::RequestChannel;
use crate::communicator::{
    AutomationCommunicator, CompanionSpec, DeviceCommunicator, ServiceCommunicator,
};
use crate::error::{ControlPlaneError, Result};
use crate::ports::PortAllocator;

/// Delivery hook for device-list changes toward the farm server. Delivery
/// failures are logged by the registry and never affect its own state.
#[async_trait]
pub trait DeviceListNotifier: Send + Sync {
    async fn device_list_changed(&self, serials: Vec<String>) -> anyhow::Result<()>;

    /// A device completed registration
    async fn device_registered(&self, _serial: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// A device was removed from the registry
    async fn device_unregistered(&self, _serial: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Notifier that publishes list changes on the agent event bus
pub struct EventBusNotifier {
    bus: Arc<EventBus>,
}

impl EventBusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl DeviceListNotifier for EventBusNotifier {
    async fn device_list_changed(&self, serials: Vec<String>) -> anyhow::Result<()> {
        self.bus.emit(Event::DeviceListChanged { serials });
        Ok(())
    }

    async fn device_registered(&self, serial: &str) -> anyhow::Result<()> {
        self.bus.emit(Event::DeviceRegistered {
            serial: serial.to_string(),
        });
        Ok(())
    }

    async fn device_unregistered(&self, serial: &str) -> anyhow::Result<()> {
        self.bus.emit(Event::DeviceUnregistered {
            serial: serial.to_string(),
        });
        Ok(())
    }
}

/// Hook the registry uses to prime an emulator's console during
/// registration. Implemented by the console cache at the agent level.
#[async_trait]
pub trait ConsolePrimer: Send + Sync {
    async fn prime(&self, device: &Device) -> anyhow::Result<()>;
}

/// One registered device entry
#[derive(Clone)]
pub struct RegisteredDevice {
    pub serial: String,
    pub communicator: Arc<DeviceCommunicator>,
    pub registered_at: DateTime<Utc>,
}

/// Authoritative map of connected devices to their bound communicators
pub struct DeviceRegistry {
    bridge: Arc<dyn DeviceBridge>,
    allocator: Arc<PortAllocator>,
    device_config: DeviceConfig,
    channel_config: ChannelConfig,
    entries: Mutex<HashMap<String, RegisteredDevice>>,
    notifier: Option<Arc<dyn DeviceListNotifier>>,
    console_primer: Option<Arc<dyn ConsolePrimer>>,
}

impl DeviceRegistry {
    pub fn new(
        bridge: Arc<dyn DeviceBridge>,
        allocator: Arc<PortAllocator>,
        device_config: DeviceConfig,
        channel_config: ChannelConfig,
    ) -> Self {
        Self {
            bridge,
            allocator,
            device_config,
            channel_config,
            entries: Mutex::new(HashMap::new()),
            notifier: None,
            console_primer: None,
        }
    }

    /// Attach the server notification hook
    pub fn with_notifier(mut self, notifier: Arc<dyn DeviceListNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Attach the emulator console priming hook
    pub fn with_console_primer(mut self, primer: Arc<dyn ConsolePrimer>) -> Self {
        self.console_primer = Some(primer);
        self
    }

    /// Register a device end to end: compatibility gate, boot wait,
    /// companion setup and validation, console priming, publication.
    ///
    /// Idempotent: an already-registered serial number is a no-op. On any
    /// failure the partially built state is torn down before the error
    /// propagates; the map never holds a half-registered entry.
    pub async fn register_device(&self, device: &Device) -> Result<()> {
        let serial = &device.serial;

        if self.entries.lock().contains_key(serial) {
            debug!(serial = %serial, "device already registered");
            return Ok(());
        }

        let api_level = self.reported_api_level(device).await;
        if api_level < self.device_config.min_api_level {
            info!(
                serial = %serial,
                api_level,
                minimum = self.device_config.min_api_level,
                "device below minimum API level, not registering"
            );
            return Ok(());
        }

        self.wait_for_boot(serial).await;

        let communicator = self.connect_device(device).await?;

        if device.is_emulator() {
            if let Some(primer) = &self.console_primer {
                if let Err(err) = primer.prime(device).await {
                    warn!(serial = %serial, error = %err, "console priming failed");
                }
            }
        }

        let entry = RegisteredDevice {
            serial: serial.clone(),
            communicator: Arc::new(communicator),
            registered_at: Utc::now(),
        };
        self.entries.lock().insert(serial.clone(), entry);

        info!(serial = %serial, "device registered");
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.device_registered(serial).await {
                warn!(serial = %serial, error = %err, "failed to deliver registration notice");
            }
        }
        self.notify_list_changed().await;
        Ok(())
    }

    /// Unregister a device, stopping its companions and releasing its
    /// ports. Idempotent: an unknown serial number is a no-op.
    pub async fn unregister_device(&self, serial: &str) -> Result<()> {
        let entry = self.entries.lock().get(serial).cloned();

        let Some(entry) = entry else {
            debug!(serial = %serial, "device not registered, nothing to do");
            return Ok(());
        };

        // Graceful shutdown first; the entry is only removed once its
        // communicator is no longer reachable. The pending-set gate keeps
        // concurrent transitions for this serial out.
        entry.communicator.shutdown().await;
        self.entries.lock().remove(serial);

        info!(serial = %serial, "device unregistered");
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.device_unregistered(serial).await {
                warn!(serial = %serial, error = %err, "failed to deliver unregistration notice");
            }
        }
        self.notify_list_changed().await;
        Ok(())
    }

    /// Communicator for a registered device
    pub fn communicator(&self, serial: &str) -> Result<Arc<DeviceCommunicator>> {
        self.entries
            .lock()
            .get(serial)
            .map(|entry| Arc::clone(&entry.communicator))
            .ok_or_else(|| ControlPlaneError::DeviceNotFound(serial.to_string()))
    }

    /// Snapshot of registered serial numbers
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.entries.lock().keys().cloned().collect();
        serials.sort();
        serials
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.entries.lock().contains_key(serial)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drain the registry: unregister every device. Called on agent
    /// shutdown after event intake has stopped.
    pub async fn shutdown(&self) {
        let serials = self.serials();
        if serials.is_empty() {
            return;
        }

        info!(count = serials.len(), "draining device registry");
        let results = join_all(
            serials
                .iter()
                .map(|serial| self.unregister_device(serial)),
        )
        .await;

        for (serial, result) in serials.iter().zip(results) {
            if let Err(err) = result {
                warn!(serial = %serial, error = %err, "failed to unregister during drain");
            }
        }
    }

    async fn reported_api_level(&self, device: &Device) -> u32 {
        if let Some(level) = device.api_level() {
            return level;
        }
        match self.bridge.get_prop(&device.serial, PROP_API_LEVEL).await {
            Ok(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!(serial = %device.serial, value = %value, "unparseable API level");
                0
            }),
            Err(err) => {
                warn!(serial = %device.serial, error = %err, "could not read API level");
                0
            }
        }
    }

    /// Poll the boot-animation property until it reports stopped. Elapsing
    /// the budget is a warning, not a failure: the device is registered
    /// anyway and later operations against it fail normally.
    async fn wait_for_boot(&self, serial: &str) {
        let interval =
            std::time::Duration::from_secs(self.device_config.boot_poll_interval_secs);
        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_secs(self.device_config.boot_timeout_secs);

        loop {
            match self.bridge.shell(serial, "getprop init.svc.bootanim").await {
                Ok(output) if output.trim() == "stopped" => {
                    debug!(serial = %serial, "boot animation stopped");
                    return;
                }
                Ok(_) | Err(_) => {}
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    serial = %serial,
                    budget_secs = self.device_config.boot_timeout_secs,
                    "boot state unconfirmed after budget, proceeding anyway"
                );
                return;
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Set up and validate both companion channels, rolling back on failure
    async fn connect_device(&self, device: &Device) -> Result<DeviceCommunicator> {
        let serial = &device.serial;
        let service_spec = CompanionSpec::service();
        let automation_spec = CompanionSpec::automation();

        let service_channel = self.attach_companion(serial, &service_spec).await?;
        let automation_channel = match self.attach_companion(serial, &automation_spec).await {
            Ok(channel) => channel,
            Err(err) => {
                service_channel.stop().await;
                return Err(err);
            }
        };

        Ok(DeviceCommunicator::new(
            serial.clone(),
            device.kind,
            Arc::clone(&self.bridge),
            ServiceCommunicator::new(service_channel),
            AutomationCommunicator::new(automation_channel),
            vec![service_spec.stop_command, automation_spec.stop_command],
        ))
    }

    /// Ensure one companion is installed, forwarded, launched, and
    /// validated. The returned channel owns the forwarded port; every error
    /// path inside stops the channel first.
    async fn attach_companion(&self, serial: &str, spec: &CompanionSpec) -> Result<RequestChannel> {
        self.ensure_companion(serial, spec).await?;

        let channel = RequestChannel::open(
            Arc::clone(&self.bridge),
            Arc::clone(&self.allocator),
            serial,
            spec.remote_port,
            self.channel_config.clone(),
        )?;

        if let Err(err) = self.bridge.shell(serial, &spec.launch_command).await {
            channel.stop().await;
            return Err(ControlPlaneError::Bridge {
                serial: serial.to_string(),
                source: err,
            });
        }

        if let Err(err) = channel.validate(spec.name, &spec.validation_marker).await {
            // Best-effort stop of whatever answered the launch command.
            let _ = self.bridge.shell(serial, &spec.stop_command).await;
            channel.stop().await;
            return Err(err);
        }

        Ok(channel)
    }

    /// Install the companion when missing, if the setup policy allows
    async fn ensure_companion(&self, serial: &str, spec: &CompanionSpec) -> Result<()> {
        let listing = self
            .bridge
            .shell(serial, &format!("pm list packages {}", spec.package))
            .await
            .map_err(|source| ControlPlaneError::Bridge {
                serial: serial.to_string(),
                source,
            })?;

        if listing.contains(&spec.package) {
            return Ok(());
        }

        if !self.device_config.auto_setup {
            return Err(ControlPlaneError::CompanionMissing {
                serial: serial.to_string(),
                companion: spec.name.to_string(),
            });
        }

        info!(serial = %serial, companion = spec.name, "installing companion");
        let artifact = spec.artifact_path(&self.device_config.companion_dir);
        self.bridge
            .install(serial, &artifact)
            .await
            .map_err(|source| ControlPlaneError::Bridge {
                serial: serial.to_string(),
                source,
            })
    }

    /// Tell the server the device list changed. Without a configured
    /// notifier, changes are tracked locally only. Delivery failures are
    /// logged and swallowed; registry consistency never depends on them.
    async fn notify_list_changed(&self) {
        let Some(notifier) = &self.notifier else {
            debug!("no server configured, tracking device list locally");
            return;
        };

        if let Err(err) = notifier.device_list_changed(self.serials()).await {
            warn!(error = %err, "failed to deliver device-list change");
        }
    }
}
