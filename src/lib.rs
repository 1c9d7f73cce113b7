//! Droidfarm - Host-side agent for an Android device farm
//!
//! The agent discovers devices attached to (or emulated on) this machine,
//! brings each one into a controllable state, and keeps a registry of live
//! device communicators a farm server can drive.
//!
//! ## Architecture
//!
//! Droidfarm is organized into specialized crates:
//!
//! - `droidfarm-core`: configuration, errors, and the event bus
//! - `droidfarm-device-bridge`: the adb seam and device tracking
//! - `droidfarm-control-plane`: port pool, request channels, registry,
//!   change handling
//! - `droidfarm-emulator-console`: the emulator administrative console
//!   client

#![warn(clippy::all)]

pub mod agent;

// Re-export member crates for library usage
pub use droidfarm_control_plane as control_plane;
pub use droidfarm_core as core;
pub use droidfarm_device_bridge as device_bridge;
pub use droidfarm_emulator_console as emulator_console;

pub use agent::Agent;
