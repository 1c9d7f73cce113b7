//! Error types for the droidfarm agent
//!
//! Agent-level errors using thiserror. The device-facing crates carry their
//! own error enums; this one covers configuration and bootstrap.

use thiserror::Error;

/// Agent-level error type
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Device bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
