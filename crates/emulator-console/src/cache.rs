//! Console Client Cache
//!
//! One console client per console port, owned by the agent context. A
//! cached client is only reused after a successful liveness probe; a dead
//! client is evicted and replaced. Real devices have no console and are
//! rejected up front.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use droidfarm_device_bridge::{Device, DeviceBridge};

use crate::client::{ConsoleClient, ConsoleError, Result};

/// Cache of live console clients keyed by console port
pub struct ConsoleCache {
    bridge: Arc<dyn DeviceBridge>,
    command_timeout: Duration,
    clients: Mutex<HashMap<u16, Arc<Mutex<ConsoleClient>>>>,
}

impl ConsoleCache {
    pub fn new(bridge: Arc<dyn DeviceBridge>, command_timeout: Duration) -> Self {
        Self {
            bridge,
            command_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Client for the device's console: cached when still responsive,
    /// otherwise freshly connected. Real devices get a capability error.
    pub async fn get_or_create(&self, device: &Device) -> Result<Arc<Mutex<ConsoleClient>>> {
        if !device.is_emulator() {
            return Err(ConsoleError::NotEmulator(device.serial.clone()));
        }

        let port = self
            .bridge
            .console_port(&device.serial)
            .await
            .map_err(|err| ConsoleError::ConnectionFailed {
                serial: device.serial.clone(),
                reason: err.to_string(),
            })?;

        let mut clients = self.clients.lock().await;

        if let Some(existing) = clients.get(&port) {
            if existing.lock().await.ping().await {
                debug!(serial = %device.serial, port, "reusing cached console client");
                return Ok(Arc::clone(existing));
            }
            warn!(serial = %device.serial, port, "cached console client is dead, reconnecting");
            clients.remove(&port);
        }

        let client = ConsoleClient::connect(&device.serial, port, self.command_timeout).await?;
        let client = Arc::new(Mutex::new(client));
        clients.insert(port, Arc::clone(&client));
        Ok(client)
    }

    /// Drop the cached client for a port, if any
    pub async fn evict(&self, port: u16) {
        if self.clients.lock().await.remove(&port).is_some() {
            debug!(port, "evicted console client");
        }
    }

    /// Drop every cached client
    pub async fn clear(&self) {
        self.clients.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
