/// JSON control protocol spoken on the console next to the capture stream.
///
/// All messages are newline-delimited JSON (NDJSON) and use `heapless`
/// types, so neither side of the protocol needs an allocator.
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::stats::StatsSnapshot;

/// Messages sent from the device to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Capture status report, periodic or on request
    #[serde(rename = "status")]
    Status {
        /// Session state: "idle", "starting", "streaming", "stopping"
        state: &'static str,
        wifi: bool,
        wired: bool,
        ch: u8,
        /// Records left before the session stops itself; -1 for unlimited
        remaining: i32,
        stats: &'a StatsSnapshot,
        /// Uptime in seconds
        uptime: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
    /// Outcome of a host command
    #[serde(rename = "result")]
    Result {
        cmd: &'static str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
}

/// Commands sent from the host to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Start a capture session
    Start {
        /// 1-13; anything else selects the default channel
        channel: u32,
        /// Records to capture; negative for unlimited
        packets: i32,
    },
    /// Stop the running session
    Stop,
    /// Request current status
    GetStatus,
}

impl HostCommand {
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::Start { .. } => "start",
            HostCommand::Stop => "stop",
            HostCommand::GetStatus => "status",
        }
    }
}

/// Wire format for host commands, a flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: heapless::String<16>,
    #[serde(default)]
    pub channel: Option<u32>,
    #[serde(default)]
    pub packets: Option<i32>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
