//! Droidfarm Agent
//!
//! Main entry point: initializes logging and configuration, connects the
//! adb bridge, and runs the device control plane until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use droidfarm::agent::Agent;
use droidfarm_core::{AgentConfig, APP_NAME, VERSION};
use droidfarm_device_bridge::{AdbBridge, DeviceTracker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} v{} starting...", APP_NAME, VERSION);

    // One optional argument: an explicit config file path.
    let config = match std::env::args().nth(1) {
        Some(path) => AgentConfig::load_from(&PathBuf::from(path))?,
        None => AgentConfig::load()?,
    };
    info!(
        ports = ?(config.ports.min_forward_port..=config.ports.max_forward_port),
        min_api = config.devices.min_api_level,
        server = config.server.is_some(),
        "configuration loaded"
    );

    let adb_path = locate_adb();
    let bridge = Arc::new(AdbBridge::new(adb_path.clone()));
    if bridge.is_available() {
        if let Err(err) = bridge.start_server().await {
            warn!(error = %err, "could not start the adb server");
        }
    } else {
        warn!(path = ?adb_path, "adb binary not found; waiting for it to appear");
    }

    let agent = Agent::new(config, bridge);
    let tracker = DeviceTracker::new(adb_path);
    let (events, tracker_join) = tracker.spawn(agent.cancellation_token());

    tokio::select! {
        result = agent.run(events) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
    }

    agent.shutdown().await;
    let _ = tracker_join.await;
    Ok(())
}

/// Resolve the adb binary: the SDK's platform-tools when an SDK root is
/// set, otherwise whatever `adb` resolves to on PATH
fn locate_adb() -> PathBuf {
    let sdk_root = std::env::var_os("ANDROID_SDK_ROOT")
        .or_else(|| std::env::var_os("ANDROID_HOME"))
        .map(PathBuf::from);

    match sdk_root {
        Some(root) => {
            let platform_tools = root.join("platform-tools");
            if cfg!(windows) {
                platform_tools.join("adb.exe")
            } else {
                platform_tools.join("adb")
            }
        }
        None => PathBuf::from("adb"),
    }
}
