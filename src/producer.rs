/// Receive-callback adapters.
///
/// Everything here runs in the link driver's receive context and must not
/// wait: the pool is tried once, the queue is tried once, and a packet that
/// cannot be placed is dropped and counted.
use crate::config::WIFI_FCS_LEN;
use crate::frame::Timestamp;
use crate::pool::BufferPool;
use crate::queue::{CaptureQueue, PacketDescriptor};
use crate::stats::CaptureStats;

/// 802.11 frame class as reported by the sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiPacketKind {
    Mgmt,
    Ctrl,
    Data,
    /// Meta-information only, no payload bits
    Misc,
}

impl WifiPacketKind {
    /// Map the driver's numeric packet type (0 mgmt, 1 ctrl, 2 data, 3 misc).
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => WifiPacketKind::Mgmt,
            1 => WifiPacketKind::Ctrl,
            2 => WifiPacketKind::Data,
            _ => WifiPacketKind::Misc,
        }
    }
}

/// One frame delivered by the Wi-Fi sniffer, borrowed for the callback.
#[derive(Debug, Clone, Copy)]
pub struct WifiFrame<'a> {
    pub kind: WifiPacketKind,
    /// Non-zero means the radio flagged a receive error
    pub rx_state: u32,
    /// On-air length including the trailing FCS
    pub sig_len: u32,
    /// Hardware receive timestamp, microseconds
    pub timestamp_us: u32,
    pub payload: &'a [u8],
}

impl WifiFrame<'_> {
    /// Whether the frame carries capturable payload.
    pub fn is_capturable(&self) -> bool {
        self.kind != WifiPacketKind::Misc && self.rx_state == 0
    }

    /// Frame length with the FCS stripped, bounded by the delivered bytes.
    pub fn capture_len(&self) -> usize {
        (self.sig_len as usize)
            .saturating_sub(WIFI_FCS_LEN)
            .min(self.payload.len())
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::from_micros(self.timestamp_us as u64)
    }
}

/// Outcome of offering one packet to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    NoBuffer,
    Rejected,
}

/// Copy `payload` into a pool buffer and queue it.
///
/// Payloads longer than the buffer are truncated; `original_len` is kept in
/// the descriptor. The caller's slice is only borrowed, so a driver-owned
/// frame buffer is free to be reclaimed as soon as this returns, whatever
/// the outcome.
pub fn offer<const N: usize>(
    pool: &BufferPool,
    queue: &CaptureQueue<N>,
    stats: &CaptureStats,
    payload: &[u8],
    original_len: usize,
    timestamp: Timestamp,
) -> Offer {
    stats.received();

    let Some(mut buf) = pool.acquire() else {
        stats.no_buffer();
        return Offer::NoBuffer;
    };

    let len = payload.len().min(buf.capacity());
    if len < payload.len() {
        stats.truncated();
    }
    buf.as_mut_slice()[..len].copy_from_slice(&payload[..len]);

    let desc = PacketDescriptor::new(buf, len, original_len, timestamp);
    match queue.try_enqueue(desc) {
        Ok(()) => {
            stats.accepted();
            Offer::Queued
        }
        Err(rejected) => {
            pool.release(rejected.into_inner().into_buffer());
            stats.queue_rejected();
            Offer::Rejected
        }
    }
}
