//! Droidfarm Core - Configuration, errors, and events
//!
//! This crate provides the shared foundation for the droidfarm agent:
//! configuration loading, the agent-level error type, and the event bus
//! the agent publishes lifecycle transitions on.

pub mod config;
pub mod error;
pub mod events;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use events::{Event, EventBus, EventSubscription};

/// Agent version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent name
pub const APP_NAME: &str = "droidfarm";
