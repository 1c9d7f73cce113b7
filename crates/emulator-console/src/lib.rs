//! Droidfarm Emulator Console
//!
//! Client for the emulator's administrative console: a line-oriented text
//! protocol used to simulate battery state, sensors, telephony, and network
//! conditions on emulator instances.

pub mod cache;
pub mod client;
pub mod protocol;

pub use cache::ConsoleCache;
pub use client::{BatteryStatus, ConsoleClient, ConsoleError};
pub use protocol::{scan_tail, ConsoleStatus};
