//! Device Tracker
//!
//! Watches `adb track-devices -l` and turns its snapshot stream into typed
//! connect/disconnect/change events on a channel. The tracker owns the
//! subprocess and respawns it with bounded backoff if it dies; consumers
//! only ever see the event channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adb::parse_devices_output;
use crate::device::{Device, DeviceEvent};

const DEVICES_HEADER: &str = "List of devices attached";
const RESPAWN_BACKOFF_MIN_MS: u64 = 200;
const RESPAWN_BACKOFF_MAX_MS: u64 = 5_000;

/// Accumulates tracker output lines into device-list snapshots.
///
/// `adb track-devices` prints a full listing after every change, separated
/// by blank lines (or a repeated header). Identical consecutive snapshots
/// are suppressed.
#[derive(Debug, Default)]
pub struct SnapshotParser {
    buffer: String,
    saw_header: bool,
    pending: bool,
    last_emitted_hash: Option<u64>,
}

impl SnapshotParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line; returns a snapshot when one completes
    pub fn push_line(&mut self, line: &str) -> Option<Vec<Device>> {
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if trimmed.contains(DEVICES_HEADER) {
            // A new snapshot is starting; flush the previous one (if any).
            let flushed = self.flush();
            self.saw_header = true;
            self.pending = true;
            return flushed;
        }

        if !self.saw_header {
            // Ignore preamble until the first header.
            return None;
        }

        if trimmed.is_empty() {
            return self.flush();
        }

        self.buffer.push_str(trimmed);
        self.buffer.push('\n');
        self.pending = true;
        None
    }

    /// Emit whatever is buffered, if it differs from the last snapshot.
    /// Repeated blank lines flush nothing; a header with no device lines
    /// flushes an empty listing.
    pub fn flush(&mut self) -> Option<Vec<Device>> {
        if !self.pending {
            return None;
        }
        self.pending = false;

        let snapshot = std::mem::take(&mut self.buffer);
        let hash = hash_str(snapshot.trim());
        if self.last_emitted_hash == Some(hash) {
            return None;
        }
        self.last_emitted_hash = Some(hash);

        Some(parse_devices_output(&snapshot))
    }
}

fn hash_str(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

/// Compute the events implied by moving from one snapshot to the next
pub fn diff_snapshots(prev: &HashMap<String, Device>, next: &[Device]) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for device in next {
        match prev.get(&device.serial) {
            None => events.push(DeviceEvent::Connected(device.clone())),
            Some(old) if old.state != device.state || old.properties != device.properties => {
                events.push(DeviceEvent::Changed(device.clone()))
            }
            Some(_) => {}
        }
    }

    for (serial, device) in prev {
        if !next.iter().any(|d| &d.serial == serial) {
            events.push(DeviceEvent::Disconnected(device.clone()));
        }
    }

    events
}

/// Watches the adb device list and emits [`DeviceEvent`]s
pub struct DeviceTracker {
    adb_path: PathBuf,
}

impl DeviceTracker {
    pub fn new(adb_path: PathBuf) -> Self {
        Self { adb_path }
    }

    /// Start tracking. Events arrive on the returned channel until the
    /// token is cancelled; the join handle completes after cleanup.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (mpsc::UnboundedReceiver<DeviceEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(self.run(tx, cancel));
        (rx, join)
    }

    async fn run(self, tx: mpsc::UnboundedSender<DeviceEvent>, cancel: CancellationToken) {
        let mut known: HashMap<String, Device> = HashMap::new();
        let mut backoff_ms = RESPAWN_BACKOFF_MIN_MS;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let mut child = match Command::new(&self.adb_path)
                .args(["track-devices", "-l"])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => child,
                Err(err) => {
                    warn!(error = %err, "failed to spawn adb device tracker");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                    }
                    backoff_ms = (backoff_ms * 2).min(RESPAWN_BACKOFF_MAX_MS);
                    continue;
                }
            };

            let Some(stdout) = child.stdout.take() else {
                warn!("adb device tracker has no stdout");
                return;
            };

            // Successful spawn: reset backoff for the next unexpected exit.
            backoff_ms = RESPAWN_BACKOFF_MIN_MS;

            let mut parser = SnapshotParser::new();
            let mut lines = BufReader::new(stdout).lines();

            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        return;
                    }
                    line = lines.next_line() => line,
                };

                match line {
                    Ok(Some(line)) => {
                        if let Some(snapshot) = parser.push_line(&line) {
                            Self::emit(&tx, &mut known, snapshot);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "failed to read adb device tracker stdout");
                        break;
                    }
                }
            }

            // Emit the last buffered snapshot (if any) before respawning.
            if let Some(snapshot) = parser.flush() {
                Self::emit(&tx, &mut known, snapshot);
            }

            let _ = child.kill().await;
            let _ = child.wait().await;

            if cancel.is_cancelled() || tx.is_closed() {
                return;
            }

            warn!("adb device tracker exited, respawning");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            }
            backoff_ms = (backoff_ms * 2).min(RESPAWN_BACKOFF_MAX_MS);
        }
    }

    fn emit(
        tx: &mpsc::UnboundedSender<DeviceEvent>,
        known: &mut HashMap<String, Device>,
        snapshot: Vec<Device>,
    ) {
        let events = diff_snapshots(known, &snapshot);
        known.clear();
        for device in snapshot {
            known.insert(device.serial.clone(), device);
        }
        for event in events {
            debug!(?event, "device event");
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceState;

    fn online(serial: &str) -> Device {
        Device::new(serial, DeviceState::Online)
    }

    #[test]
    fn parser_emits_on_blank_line() {
        let mut parser = SnapshotParser::new();
        assert_eq!(parser.push_line("noise before header"), None);
        assert_eq!(parser.push_line(DEVICES_HEADER), None);
        assert_eq!(parser.push_line("emulator-5554\tdevice"), None);

        let snapshot = parser.push_line("").expect("expected snapshot");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].serial, "emulator-5554");
    }

    #[test]
    fn parser_suppresses_duplicate_snapshots() {
        let mut parser = SnapshotParser::new();
        parser.push_line(DEVICES_HEADER);
        parser.push_line("emulator-5554\tdevice");
        assert!(parser.push_line("").is_some());
        assert_eq!(parser.push_line(""), None);
    }

    #[test]
    fn parser_accumulates_next_snapshot_without_new_header() {
        let mut parser = SnapshotParser::new();
        parser.push_line(DEVICES_HEADER);
        parser.push_line("A\tdevice");
        assert!(parser.push_line("").is_some());

        parser.push_line("B\tdevice");
        let snapshot = parser.push_line("").expect("expected snapshot");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].serial, "B");
    }

    #[test]
    fn parser_flushes_on_new_header() {
        let mut parser = SnapshotParser::new();
        parser.push_line(DEVICES_HEADER);
        parser.push_line("A\tdevice");
        let first = parser
            .push_line(DEVICES_HEADER)
            .expect("expected flush on repeated header");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].serial, "A");
    }

    #[test]
    fn diff_detects_connect_disconnect_change() {
        let mut prev = HashMap::new();
        prev.insert("A".to_string(), online("A"));
        let mut offline_b = online("B");
        prev.insert("B".to_string(), offline_b.clone());

        offline_b.state = DeviceState::Offline;
        let next = vec![offline_b, online("C")];

        let events = diff_snapshots(&prev, &next);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, DeviceEvent::Changed(d) if d.serial == "B")));
        assert!(events
            .iter()
            .any(|e| matches!(e, DeviceEvent::Connected(d) if d.serial == "C")));
        assert!(events
            .iter()
            .any(|e| matches!(e, DeviceEvent::Disconnected(d) if d.serial == "A")));
    }

    #[test]
    fn diff_is_empty_for_identical_snapshots() {
        let mut prev = HashMap::new();
        prev.insert("A".to_string(), online("A"));
        assert!(diff_snapshots(&prev, &[online("A")]).is_empty());
    }
}
