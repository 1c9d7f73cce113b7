//! Port Forwarder
//!
//! Binds exactly one allocated local port to one fixed remote port on one
//! device for the lifetime of a communicator. The local port is taken from
//! the allocator at construction and is guaranteed to go back on `stop()`,
//! whether or not forwarding ever succeeded.

use std::sync::Arc;
use tracing::{debug, warn};

use droidfarm_device_bridge::DeviceBridge;

use crate::error::{ControlPlaneError, Result};
use crate::ports::PortAllocator;

/// One local↔remote forwarding relation
pub struct PortForwarder {
    bridge: Arc<dyn DeviceBridge>,
    allocator: Arc<PortAllocator>,
    serial: String,
    local_port: u16,
    remote_port: u16,
    forwarded: bool,
    stopped: bool,
}

impl PortForwarder {
    /// Allocate a local port for a new forwarding relation. The binding is
    /// not created until [`forward`](Self::forward) is called.
    pub fn open(
        bridge: Arc<dyn DeviceBridge>,
        allocator: Arc<PortAllocator>,
        serial: impl Into<String>,
        remote_port: u16,
    ) -> Result<Self> {
        let local_port = allocator.allocate()?;
        Ok(Self {
            bridge,
            allocator,
            serial: serial.into(),
            local_port,
            remote_port,
            forwarded: false,
            stopped: false,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// Create the local→remote binding. No-op when already forwarded. On
    /// bridge failure the local port stays allocated; the caller decides
    /// whether to stop the relation.
    pub async fn forward(&mut self) -> Result<()> {
        if self.stopped {
            return Err(ControlPlaneError::ChannelStopped(self.serial.clone()));
        }
        if self.forwarded {
            return Ok(());
        }

        self.bridge
            .forward(&self.serial, self.local_port, self.remote_port)
            .await
            .map_err(|source| ControlPlaneError::ForwardingFailed {
                serial: self.serial.clone(),
                source,
            })?;

        self.forwarded = true;
        debug!(
            serial = %self.serial,
            local = self.local_port,
            remote = self.remote_port,
            "forward established"
        );
        Ok(())
    }

    /// Mark the binding broken so the next [`forward`](Self::forward)
    /// re-creates it. Used by the request channel after a transport failure.
    pub fn reset(&mut self) {
        self.forwarded = false;
    }

    /// Tear down the binding and release the local port. Idempotent, and
    /// must be called on every exit path of the owning channel; the port is
    /// released even when forwarding never succeeded or removal fails.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if self.forwarded {
            if let Err(err) = self
                .bridge
                .remove_forward(&self.serial, self.local_port)
                .await
            {
                warn!(
                    serial = %self.serial,
                    local = self.local_port,
                    error = %err,
                    "failed to remove forward"
                );
            }
            self.forwarded = false;
        }

        self.allocator.release(self.local_port);
        debug!(serial = %self.serial, local = self.local_port, "forward stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBridge;

    #[tokio::test]
    async fn forward_is_idempotent() {
        let bridge = Arc::new(MockBridge::new());
        let allocator = Arc::new(PortAllocator::new(6000, 6001));

        let mut forwarder =
            PortForwarder::open(bridge.clone(), allocator.clone(), "emulator-5554", 10090)
                .unwrap();
        forwarder.forward().await.unwrap();
        forwarder.forward().await.unwrap();

        assert_eq!(bridge.forward_count(), 1);
        assert!(forwarder.is_forwarded());

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn reset_forces_a_new_binding() {
        let bridge = Arc::new(MockBridge::new());
        let allocator = Arc::new(PortAllocator::new(6000, 6001));

        let mut forwarder =
            PortForwarder::open(bridge.clone(), allocator.clone(), "emulator-5554", 10090)
                .unwrap();
        forwarder.forward().await.unwrap();
        forwarder.reset();
        forwarder.forward().await.unwrap();

        assert_eq!(bridge.forward_count(), 2);
        forwarder.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_port_even_without_forwarding() {
        let bridge = Arc::new(MockBridge::new());
        let allocator = Arc::new(PortAllocator::new(6000, 6000));

        let mut forwarder =
            PortForwarder::open(bridge, allocator.clone(), "emulator-5554", 10090).unwrap();
        assert_eq!(allocator.free_count(), 0);

        forwarder.stop().await;
        forwarder.stop().await;
        assert_eq!(allocator.free_count(), 1);
    }

    #[tokio::test]
    async fn bridge_failure_keeps_port_allocated() {
        let bridge = Arc::new(MockBridge::new());
        bridge.fail_forwards(true);
        let allocator = Arc::new(PortAllocator::new(6000, 6000));

        let mut forwarder =
            PortForwarder::open(bridge, allocator.clone(), "emulator-5554", 10090).unwrap();

        let err = forwarder.forward().await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::ForwardingFailed { .. }));
        assert_eq!(allocator.free_count(), 0);

        forwarder.stop().await;
        assert_eq!(allocator.free_count(), 1);
    }
}
