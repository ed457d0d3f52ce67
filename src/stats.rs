/// Capture counters.
///
/// Drops on the receive path are expected under load; they are counted here
/// instead of being logged per packet. 32-bit atomics only.
use core::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CaptureStats {
    received: AtomicU32,
    accepted: AtomicU32,
    no_buffer: AtomicU32,
    queue_rejected: AtomicU32,
    truncated: AtomicU32,
    written: AtomicU32,
    write_errors: AtomicU32,
    discarded: AtomicU32,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames handed to the producer (after type filtering)
    pub received: u32,
    /// Frames that made it into the queue
    pub accepted: u32,
    /// Dropped: no free pool buffer
    pub no_buffer: u32,
    /// Dropped: queue full or closed
    pub queue_rejected: u32,
    /// Frames cut to the buffer size
    pub truncated: u32,
    pub written: u32,
    pub write_errors: u32,
    /// Still queued at stop, released unwritten
    pub discarded: u32,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u32 {
        self.no_buffer.wrapping_add(self.queue_rejected)
    }
}

impl CaptureStats {
    pub const fn new() -> Self {
        Self {
            received: AtomicU32::new(0),
            accepted: AtomicU32::new(0),
            no_buffer: AtomicU32::new(0),
            queue_rejected: AtomicU32::new(0),
            truncated: AtomicU32::new(0),
            written: AtomicU32::new(0),
            write_errors: AtomicU32::new(0),
            discarded: AtomicU32::new(0),
        }
    }

    pub(crate) fn received(&self) {
        bump(&self.received, 1);
    }

    pub(crate) fn accepted(&self) {
        bump(&self.accepted, 1);
    }

    pub(crate) fn no_buffer(&self) {
        bump(&self.no_buffer, 1);
    }

    pub(crate) fn queue_rejected(&self) {
        bump(&self.queue_rejected, 1);
    }

    pub(crate) fn truncated(&self) {
        bump(&self.truncated, 1);
    }

    pub(crate) fn written(&self) {
        bump(&self.written, 1);
    }

    pub(crate) fn write_error(&self) {
        bump(&self.write_errors, 1);
    }

    pub(crate) fn discarded(&self, count: usize) {
        bump(&self.discarded, count as u32);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            no_buffer: self.no_buffer.load(Ordering::Relaxed),
            queue_rejected: self.queue_rejected.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Done at each `start`.
    pub fn reset(&self) {
        for counter in [
            &self.received,
            &self.accepted,
            &self.no_buffer,
            &self.queue_rejected,
            &self.truncated,
            &self.written,
            &self.write_errors,
            &self.discarded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn bump(counter: &AtomicU32, by: u32) {
    counter.fetch_add(by, Ordering::Relaxed);
}
