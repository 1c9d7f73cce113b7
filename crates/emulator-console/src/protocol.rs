//! Console response scanning
//!
//! The emulator console answers every command with free-form lines followed
//! by a terminal marker: a line that is exactly `OK`, or a line beginning
//! with `KO`, each ended by `\r\n`. Responses can span many lines, so the
//! scanner only inspects the bytes written since the previous line
//! terminator instead of re-scanning the whole buffer after every read.

/// Outcome of scanning the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStatus {
    /// Terminal `OK` line seen
    Ok,
    /// Terminal `KO` line seen
    Failed,
    /// No terminal marker yet, keep reading
    Incomplete,
}

/// Inspect the tail of the buffer for a terminal marker
pub fn scan_tail(buffer: &[u8]) -> ConsoleStatus {
    // The shortest terminal response is "OK\r\n".
    if buffer.len() < 4 || !buffer.ends_with(b"\r\n") {
        return ConsoleStatus::Incomplete;
    }

    let line = last_line(&buffer[..buffer.len() - 2]);
    if line == b"OK" {
        ConsoleStatus::Ok
    } else if line.starts_with(b"KO") {
        ConsoleStatus::Failed
    } else {
        ConsoleStatus::Incomplete
    }
}

/// Payload preceding the terminal marker line, for commands that print a
/// multi-line capture before their `OK`
pub fn payload(buffer: &[u8]) -> &[u8] {
    let body = &buffer[..buffer.len().saturating_sub(2)];
    match body.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &buffer[..=pos],
        None => &[],
    }
}

/// The terminal line itself, without its `\r\n`
pub fn terminal_line(buffer: &[u8]) -> &[u8] {
    last_line(&buffer[..buffer.len().saturating_sub(2)])
}

fn last_line(body: &[u8]) -> &[u8] {
    let start = body
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    let line = &body[start..];
    line.strip_suffix(b"\r").unwrap_or(line)
}
