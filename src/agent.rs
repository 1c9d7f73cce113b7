//! Agent Context
//!
//! Owns every shared component of the farm agent: the device bridge, port
//! allocator, device registry, change handler, console cache, and event
//! bus. All of them are constructed here and passed by handle to whoever
//! needs them; nothing lives in process-wide statics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use droidfarm_control_plane::{
    ConsolePrimer, DeviceAction, DeviceChangeHandler, DeviceRegistry, EventBusNotifier,
    PortAllocator,
};
use droidfarm_core::events::{Event, EventBus};
use droidfarm_core::{AgentConfig, AgentError};
use droidfarm_device_bridge::{Device, DeviceBridge, DeviceEvent};
use droidfarm_emulator_console::ConsoleCache;

/// Primes emulator consoles through the agent's console cache
struct CachePrimer {
    consoles: Arc<ConsoleCache>,
}

#[async_trait]
impl ConsolePrimer for CachePrimer {
    async fn prime(&self, device: &Device) -> anyhow::Result<()> {
        self.consoles.get_or_create(device).await?;
        Ok(())
    }
}

/// Top-level context for one agent process
pub struct Agent {
    config: AgentConfig,
    bridge: Arc<dyn DeviceBridge>,
    allocator: Arc<PortAllocator>,
    registry: Arc<DeviceRegistry>,
    handler: Arc<DeviceChangeHandler>,
    consoles: Arc<ConsoleCache>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Agent {
    /// Construct the agent and wire its components together
    pub fn new(config: AgentConfig, bridge: Arc<dyn DeviceBridge>) -> Self {
        let events = Arc::new(EventBus::new());
        let allocator = Arc::new(PortAllocator::new(
            config.ports.min_forward_port,
            config.ports.max_forward_port,
        ));
        let consoles = Arc::new(ConsoleCache::new(
            Arc::clone(&bridge),
            Duration::from_millis(config.console.command_timeout_ms),
        ));

        // Lifecycle changes always land on the local bus; when a server is
        // configured, the exposition layer subscribes and relays them.
        let registry = Arc::new(
            DeviceRegistry::new(
                Arc::clone(&bridge),
                Arc::clone(&allocator),
                config.devices.clone(),
                config.channel.clone(),
            )
            .with_console_primer(Arc::new(CachePrimer {
                consoles: Arc::clone(&consoles),
            }))
            .with_notifier(Arc::new(EventBusNotifier::new(Arc::clone(&events)))),
        );
        let handler = Arc::new(DeviceChangeHandler::new(Arc::clone(&registry)));

        Self {
            config,
            bridge,
            allocator,
            registry,
            handler,
            consoles,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// The registry of currently usable devices
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The port pool shared by every registration
    pub fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    /// The console client cache
    pub fn consoles(&self) -> &Arc<ConsoleCache> {
        &self.consoles
    }

    /// The agent event bus
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The active configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Token cancelled when shutdown begins; the tracker shares it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the event stream ends or shutdown is requested. Devices
    /// already attached at startup are swept in before tracker events are
    /// consumed, so the registry converges without waiting for the first
    /// hardware change.
    pub async fn run(
        &self,
        events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> droidfarm_core::Result<()> {
        self.sweep_attached_devices().await?;
        self.events.emit(Event::AgentStarted);
        self.handler.run(events, self.cancel.child_token()).await;
        Ok(())
    }

    /// Dispatch a connect for every device already visible to the bridge
    async fn sweep_attached_devices(&self) -> droidfarm_core::Result<()> {
        let devices = self
            .bridge
            .list_devices()
            .await
            .map_err(|err| AgentError::BridgeUnavailable(err.to_string()))?;

        info!(count = devices.len(), "initial device sweep");
        for device in devices {
            if device.is_usable() {
                self.handler.handle_action(DeviceAction::Connect, device);
            } else {
                warn!(serial = %device.serial, state = ?device.state, "skipping unusable device");
            }
        }
        Ok(())
    }

    /// Shutdown drain: stop accepting hardware events, then unregister
    /// every device (releasing its ports), then drop the console clients.
    pub async fn shutdown(&self) {
        info!("agent shutting down");
        self.events.emit(Event::Shutdown);
        self.cancel.cancel();
        self.registry.shutdown().await;
        self.consoles.clear().await;
        info!("agent shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use droidfarm_device_bridge::bridge::{BridgeError, Result as BridgeResult};
    use droidfarm_device_bridge::DeviceState;

    /// Bridge stub that reports a fixed device list and refuses the rest
    struct ListOnlyBridge {
        devices: Vec<Device>,
    }

    #[async_trait]
    impl DeviceBridge for ListOnlyBridge {
        async fn list_devices(&self) -> BridgeResult<Vec<Device>> {
            Ok(self.devices.clone())
        }

        async fn shell(&self, serial: &str, _command: &str) -> BridgeResult<String> {
            Err(BridgeError::DeviceNotFound(serial.to_string()))
        }

        async fn forward(&self, serial: &str, _local: u16, _remote: u16) -> BridgeResult<()> {
            Err(BridgeError::DeviceNotFound(serial.to_string()))
        }

        async fn remove_forward(&self, _serial: &str, _local: u16) -> BridgeResult<()> {
            Ok(())
        }

        async fn install(&self, serial: &str, _artifact: &Path) -> BridgeResult<()> {
            Err(BridgeError::DeviceNotFound(serial.to_string()))
        }

        async fn console_port(&self, serial: &str) -> BridgeResult<u16> {
            Err(BridgeError::NoConsolePort(serial.to_string()))
        }
    }

    #[tokio::test]
    async fn constructs_with_configured_port_pool() {
        let agent = Agent::new(
            AgentConfig::default(),
            Arc::new(ListOnlyBridge { devices: vec![] }),
        );
        assert_eq!(agent.allocator().capacity(), 100);
        assert!(agent.registry().is_empty());
    }

    #[tokio::test]
    async fn run_sweeps_then_stops_on_cancel() {
        let agent = Agent::new(
            AgentConfig::default(),
            Arc::new(ListOnlyBridge {
                devices: vec![Device::new("0123456789ABCDEF", DeviceState::Offline)],
            }),
        );
        let sub = agent.events().subscribe();
        let (_tx, rx) = mpsc::unbounded_channel();

        let cancel = agent.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        agent.run(rx).await.unwrap();
        assert!(matches!(sub.try_recv(), Ok(Event::AgentStarted)));
        // The offline device was never registered.
        assert!(agent.registry().is_empty());

        agent.shutdown().await;
        assert!(sub.iter().any(|event| matches!(event, Event::Shutdown)));
    }
}
