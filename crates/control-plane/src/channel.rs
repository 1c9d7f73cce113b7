//! On-Device Request Channel
//!
//! Delivers one typed request and receives one typed response from a
//! companion process reachable through a forwarded port. Each request opens
//! a fresh socket; transport failures are retried up to a configured limit,
//! re-forwarding the port before every attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use droidfarm_core::config::ChannelConfig;
use droidfarm_device_bridge::DeviceBridge;

use crate::error::{ControlPlaneError, Result};
use crate::forward::PortForwarder;
use crate::ports::PortAllocator;

/// Request kinds understood by every companion process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Validation handshake; the companion echoes the marker argument
    Validate,
    /// Read-only lookup
    Query,
    /// State-changing operation
    Perform,
    /// Ask the companion to shut itself down
    Stop,
}

/// One request envelope, serialized as a single JSON object per connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub kind: RequestKind,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Request {
    pub fn new(kind: RequestKind, arguments: Vec<Value>) -> Self {
        Self { kind, arguments }
    }
}

/// Companion response: the raw result or a serialized failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Result(Value),
    Failure(String),
}

/// Retrying request/response channel to one companion process
pub struct RequestChannel {
    serial: String,
    local_port: u16,
    forwarder: tokio::sync::Mutex<PortForwarder>,
    config: ChannelConfig,
    stopped: AtomicBool,
}

impl RequestChannel {
    /// Allocate a port and build a channel to `remote_port` on the device.
    /// Nothing is forwarded until the first request.
    pub fn open(
        bridge: Arc<dyn DeviceBridge>,
        allocator: Arc<PortAllocator>,
        serial: impl Into<String>,
        remote_port: u16,
        config: ChannelConfig,
    ) -> Result<Self> {
        let serial = serial.into();
        let forwarder = PortForwarder::open(bridge, allocator, serial.clone(), remote_port)?;
        let local_port = forwarder.local_port();
        Ok(Self {
            serial,
            local_port,
            forwarder: tokio::sync::Mutex::new(forwarder),
            config,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Send one request and return the companion's result value.
    ///
    /// Transport-level failures (refused, reset, premature EOF) are retried
    /// with a fixed backoff; a failure reported by the companion itself is
    /// returned immediately without retry.
    pub async fn request(&self, request: &Request) -> Result<Value> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ControlPlaneError::ChannelStopped(self.serial.clone()));
        }

        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut last_error = String::new();

        for attempt in 1..=self.config.retry_limit {
            // Re-forward before every attempt; a broken binding is the most
            // common cause of a refused connection.
            {
                let mut forwarder = self.forwarder.lock().await;
                if let Err(err) = forwarder.forward().await {
                    last_error = err.to_string();
                    warn!(
                        serial = %self.serial,
                        attempt,
                        error = %err,
                        "forwarding attempt failed"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            match self.exchange(request).await {
                Ok(Response::Result(value)) => return Ok(value),
                Ok(Response::Failure(message)) => {
                    return Err(ControlPlaneError::CompanionFailure {
                        serial: self.serial.clone(),
                        message,
                    })
                }
                Err(err) => {
                    last_error = err.to_string();
                    debug!(
                        serial = %self.serial,
                        attempt,
                        error = %err,
                        "request attempt failed"
                    );
                    self.forwarder.lock().await.reset();
                    if attempt < self.config.retry_limit {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(ControlPlaneError::Transport {
            serial: self.serial.clone(),
            attempts: self.config.retry_limit,
            last_error,
        })
    }

    /// Validation handshake: the companion must echo the marker exactly.
    /// A mismatch is terminal; transport retries stay capped by the
    /// configured limit, never indefinite.
    pub async fn validate(&self, companion: &str, marker: &str) -> Result<()> {
        let request = Request::new(RequestKind::Validate, vec![json!(marker)]);
        let echoed = self.request(&request).await.map_err(|err| {
            ControlPlaneError::ValidationFailed {
                serial: self.serial.clone(),
                companion: companion.to_string(),
                reason: err.to_string(),
            }
        })?;

        if echoed != json!(marker) {
            return Err(ControlPlaneError::ValidationFailed {
                serial: self.serial.clone(),
                companion: companion.to_string(),
                reason: format!("expected marker {:?}, got {}", marker, echoed),
            });
        }

        debug!(serial = %self.serial, companion, "companion validated");
        Ok(())
    }

    /// Release the forwarding relation; the channel is unusable afterward.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.forwarder.lock().await.stop().await;
    }

    /// One socket, one request, one response
    async fn exchange(&self, request: &Request) -> std::io::Result<Response> {
        let connect = TcpStream::connect(("127.0.0.1", self.local_port));
        let mut stream = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connect,
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        let payload = serde_json::to_vec(request)?;
        stream.write_all(&payload).await?;
        // Half-close marks the end of the request; the response is
        // everything until the companion closes its side.
        stream.shutdown().await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;

        if reply.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "companion closed the connection without a response",
            ));
        }

        serde_json::from_slice(&reply).map_err(|err| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed companion response: {}", err),
            )
        })
    }
}
