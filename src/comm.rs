/// Console control channel: NDJSON status and command handling.
///
/// The console carries three things at once: text logs, the framed capture
/// stream, and this NDJSON control protocol. Host commands arrive on the
/// console's receive side and are accumulated line by line.
use core::fmt::Write;

use crate::board;
use crate::config::{DEFAULT_CHANNEL, UNLIMITED};
use crate::error::Result;
use crate::protocol::{DeviceMessage, HostCommand, RawCommand, MAX_MSG_LEN, VERSION};
use crate::session::{CaptureSession, SessionStatus, WifiLink, WiredLink};
use crate::writer::CaptureSink;

/// Interval between unsolicited status lines, seconds
pub const STATUS_INTERVAL_SECS: u64 = 30;

/// Rendered error for a `result` message
pub type ErrorText = heapless::String<64>;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Build a status message from a session snapshot.
pub fn status_message(status: &SessionStatus, uptime_secs: u32) -> DeviceMessage<'_> {
    DeviceMessage::Status {
        state: status.state.as_str(),
        wifi: status.wifi,
        wired: status.wired,
        ch: status.channel,
        remaining: status.remaining,
        stats: &status.stats,
        uptime: uptime_secs,
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

/// Build the reply to a command. `text` holds the rendered error, if any.
pub fn result_message<'a>(
    cmd: &HostCommand,
    result: &Result<()>,
    text: &'a mut ErrorText,
) -> DeviceMessage<'a> {
    text.clear();
    let error = match result {
        Ok(()) => None,
        Err(e) => {
            // Truncated if it does not fit
            let _ = write!(text, "{}", e);
            let text: &'a ErrorText = text;
            Some(text.as_str())
        }
    };
    DeviceMessage::Result {
        cmd: cmd.name(),
        ok: result.is_ok(),
        error,
    }
}

// ── Command handling ───────────────────────────────────────────────────

/// Deserialize a HostCommand from a JSON byte slice.
///
/// `start` without a channel uses the default channel; without a packet
/// count it captures until stopped.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed).ok()?;
    match raw.cmd.as_str() {
        "start" => Some(HostCommand::Start {
            channel: raw.channel.unwrap_or(DEFAULT_CHANNEL as u32),
            packets: raw.packets.unwrap_or(UNLIMITED),
        }),
        "stop" => Some(HostCommand::Stop),
        "status" | "get_status" => Some(HostCommand::GetStatus),
        _ => None,
    }
}

/// Apply a host command to the session.
///
/// `GetStatus` has no effect here; the caller answers it with a status line.
pub async fn handle_command<S, W, E>(
    cmd: HostCommand,
    session: &CaptureSession<S, W, E>,
) -> Result<()>
where
    S: CaptureSink,
    W: WifiLink,
    E: WiredLink,
{
    match cmd {
        HostCommand::Start { channel, packets } => {
            session.start(channel, packets).await?;
            log::info!("Capture started by host command");
        }
        HostCommand::Stop => {
            session.stop().await?;
            log::info!("Capture stopped by host command");
        }
        HostCommand::GetStatus => {}
    }
    Ok(())
}

// ── Serial NDJSON reader ───────────────────────────────────────────────

/// Serial NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected. An overlong line is dropped whole.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let len = self.pos;
            let overflowed = self.overflowed;
            self.pos = 0;
            self.overflowed = false;
            if len > 0 && !overflowed {
                Some(&self.buf[..len])
            } else {
                None
            }
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            self.overflowed = true;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && data[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &data[..end]
}
