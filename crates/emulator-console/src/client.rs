//! Emulator Console Client
//!
//! Line-oriented text client for the emulator's administrative console.
//! Commands are newline-terminated ASCII; every response ends in a line
//! that is exactly `OK` or begins with `KO`. One client owns one console
//! connection; reuse across commands is managed by the cache.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::protocol::{payload, scan_tail, terminal_line, ConsoleStatus};

/// Pause between write attempts while the socket is not writable
const WRITE_RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Console errors
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Console connection failed for device {serial}: {reason}")]
    ConnectionFailed { serial: String, reason: String },
    #[error("Console command `{command}` failed on device {serial}: {reply}")]
    CommandFailed {
        serial: String,
        command: String,
        reply: String,
    },
    #[error("Device {0} is not an emulator; console operations are unsupported")]
    NotEmulator(String),
}

/// Result type for console operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Battery status values the console understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl BatteryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryStatus::Unknown => "unknown",
            BatteryStatus::Charging => "charging",
            BatteryStatus::Discharging => "discharging",
            BatteryStatus::NotCharging => "not-charging",
            BatteryStatus::Full => "full",
        }
    }
}

/// Client for one emulator console port
pub struct ConsoleClient {
    serial: String,
    port: u16,
    stream: TcpStream,
    timeout: Duration,
}

impl ConsoleClient {
    /// Connect and drain the console banner (which itself terminates in
    /// `OK`)
    pub async fn connect(serial: impl Into<String>, port: u16, timeout: Duration) -> Result<Self> {
        let serial = serial.into();

        let stream = tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port)))
            .await
            .map_err(|_| ConsoleError::ConnectionFailed {
                serial: serial.clone(),
                reason: format!("connect to console port {} timed out", port),
            })?
            .map_err(|err| ConsoleError::ConnectionFailed {
                serial: serial.clone(),
                reason: err.to_string(),
            })?;

        let mut client = Self {
            serial,
            port,
            stream,
            timeout,
        };

        // The banner is a normal OK-terminated response.
        client.read_response("<banner>").await?;
        debug!(serial = %client.serial, port, "console connected");
        Ok(client)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Liveness probe: a no-op command that must terminate in `OK`
    pub async fn ping(&mut self) -> bool {
        self.command("help").await.is_ok()
    }

    /// Send one command and capture everything before its terminal marker.
    /// A trailing newline is appended when the caller omitted one.
    pub async fn command(&mut self, command: &str) -> Result<String> {
        let mut line = command.as_bytes().to_vec();
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }

        trace!(serial = %self.serial, command, "console command");
        self.write_line(command, &line).await?;
        self.read_response(command).await
    }

    /// Write the whole line under the wall-clock budget. The socket can
    /// stop accepting bytes while the emulator is wedged; zero progress
    /// past the deadline is a connection failure, as is a closed socket.
    async fn write_line(&mut self, command: &str, line: &[u8]) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut written = 0;

        while written < line.len() {
            if tokio::time::Instant::now() >= deadline {
                return Err(self.connection_failed(command, "write timed out"));
            }

            match self.stream.try_write(&line[written..]) {
                Ok(0) => {
                    return Err(self.connection_failed(command, "connection closed during write"))
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(WRITE_RETRY_PAUSE).await;
                }
                Err(err) => return Err(self.connection_failed(command, &err.to_string())),
            }
        }

        Ok(())
    }

    /// Read until the scanner sees a terminal marker
    async fn read_response(&mut self, command: &str) -> Result<String> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut buffer = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut chunk))
                .await
                .map_err(|_| self.connection_failed(command, "response timed out"))?
                .map_err(|err| self.connection_failed(command, &err.to_string()))?;

            if read == 0 {
                return Err(self.connection_failed(command, "console closed the connection"));
            }

            buffer.extend_from_slice(&chunk[..read]);

            match scan_tail(&buffer) {
                ConsoleStatus::Ok => {
                    return Ok(String::from_utf8_lossy(payload(&buffer)).into_owned());
                }
                ConsoleStatus::Failed => {
                    let reply = String::from_utf8_lossy(terminal_line(&buffer)).into_owned();
                    return Err(ConsoleError::CommandFailed {
                        serial: self.serial.clone(),
                        command: command.to_string(),
                        reply,
                    });
                }
                ConsoleStatus::Incomplete => {}
            }
        }
    }

    fn connection_failed(&self, command: &str, reason: &str) -> ConsoleError {
        ConsoleError::ConnectionFailed {
            serial: self.serial.clone(),
            reason: format!("{} (command `{}`)", reason, command),
        }
    }

    // Battery and power

    /// Battery charge percentage, 0-100
    pub async fn set_battery_level(&mut self, level: u8) -> Result<()> {
        self.command(&format!("power capacity {}", level.min(100)))
            .await?;
        Ok(())
    }

    pub async fn set_battery_status(&mut self, status: BatteryStatus) -> Result<()> {
        self.command(&format!("power status {}", status.as_str()))
            .await?;
        Ok(())
    }

    /// Switch between AC power and battery
    pub async fn set_ac_power(&mut self, plugged_in: bool) -> Result<()> {
        let state = if plugged_in { "on" } else { "off" };
        self.command(&format!("power ac {}", state)).await?;
        Ok(())
    }

    // Simulated sensors

    pub async fn set_orientation(&mut self, azimuth: f32, pitch: f32, roll: f32) -> Result<()> {
        self.command(&format!(
            "sensor set orientation {}:{}:{}",
            azimuth, pitch, roll
        ))
        .await?;
        Ok(())
    }

    pub async fn set_acceleration(&mut self, x: f32, y: f32, z: f32) -> Result<()> {
        self.command(&format!("sensor set acceleration {}:{}:{}", x, y, z))
            .await?;
        Ok(())
    }

    pub async fn set_magnetic_field(&mut self, x: f32, y: f32, z: f32) -> Result<()> {
        self.command(&format!("sensor set magnetic-field {}:{}:{}", x, y, z))
            .await?;
        Ok(())
    }

    pub async fn set_proximity(&mut self, distance: f32) -> Result<()> {
        self.command(&format!("sensor set proximity {}", distance))
            .await?;
        Ok(())
    }

    // Network shaping and telephony

    pub async fn set_mobile_data(&mut self, enabled: bool) -> Result<()> {
        let state = if enabled { "on" } else { "off" };
        self.command(&format!("gsm data {}", state)).await?;
        Ok(())
    }

    /// Simulated network speed in KB/s, upstream and downstream
    pub async fn set_network_speed(&mut self, up: u32, down: u32) -> Result<()> {
        self.command(&format!("network speed {}:{}", up, down))
            .await?;
        Ok(())
    }

    pub async fn send_sms(&mut self, phone_number: &str, message: &str) -> Result<()> {
        self.command(&format!("sms send {} {}", phone_number, message))
            .await?;
        Ok(())
    }

    /// Simulate an incoming voice call
    pub async fn receive_call(&mut self, phone_number: &str) -> Result<()> {
        self.command(&format!("gsm call {}", phone_number)).await?;
        Ok(())
    }

    pub async fn accept_call(&mut self, phone_number: &str) -> Result<()> {
        self.command(&format!("gsm accept {}", phone_number)).await?;
        Ok(())
    }

    pub async fn hold_call(&mut self, phone_number: &str) -> Result<()> {
        self.command(&format!("gsm hold {}", phone_number)).await?;
        Ok(())
    }

    pub async fn cancel_call(&mut self, phone_number: &str) -> Result<()> {
        self.command(&format!("gsm cancel {}", phone_number)).await?;
        Ok(())
    }
}
