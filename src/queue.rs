/// Bounded hand-off between the receive callback and the consumer task.
///
/// The producer side never waits: a full (or closed) queue hands the
/// descriptor back so the caller can return its buffer to the pool. The
/// consumer waits at most `timeout` per dequeue, which is also where it
/// notices a stop request.
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{with_timeout, Duration};

use crate::frame::Timestamp;
use crate::pool::{BufferPool, PacketBuf};

/// One captured packet waiting to be written.
///
/// Owns its pool buffer until the consumer releases it.
#[derive(Debug)]
pub struct PacketDescriptor {
    buf: PacketBuf,
    len: u32,
    original_len: u32,
    timestamp: Timestamp,
}

impl PacketDescriptor {
    /// `len` is clamped to the buffer's capacity.
    pub fn new(buf: PacketBuf, len: usize, original_len: usize, timestamp: Timestamp) -> Self {
        let len = len.min(buf.capacity());
        Self {
            buf,
            len: len as u32,
            original_len: original_len.max(len) as u32,
            timestamp,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf.as_slice()[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn original_len(&self) -> u32 {
        self.original_len
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Give up the descriptor, keeping the buffer for release.
    pub fn into_buffer(self) -> PacketBuf {
        self.buf
    }
}

/// Why `try_enqueue` handed a descriptor back.
#[derive(Debug)]
pub enum Rejected {
    Full(PacketDescriptor),
    Closed(PacketDescriptor),
}

impl Rejected {
    pub fn into_inner(self) -> PacketDescriptor {
        match self {
            Rejected::Full(d) | Rejected::Closed(d) => d,
        }
    }
}

pub struct CaptureQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, PacketDescriptor, N>,
    open: AtomicBool,
}

impl<const N: usize> CaptureQueue<N> {
    /// A closed queue; `open` makes it accept descriptors.
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            open: AtomicBool::new(false),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Stop accepting descriptors. Anything still queued stays until `drain`.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Enqueue without waiting. Safe from the receive callback.
    pub fn try_enqueue(&self, desc: PacketDescriptor) -> Result<(), Rejected> {
        if !self.is_open() {
            return Err(Rejected::Closed(desc));
        }
        self.channel
            .try_send(desc)
            .map_err(|TrySendError::Full(desc)| Rejected::Full(desc))
    }

    /// Wait up to `timeout` for a descriptor. `None` on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> Option<PacketDescriptor> {
        with_timeout(timeout, self.channel.receive()).await.ok()
    }

    /// Release the buffer of every queued descriptor without writing it.
    /// Returns how many were discarded.
    pub fn drain(&self, pool: &BufferPool) -> usize {
        let mut count = 0;
        while let Ok(desc) = self.channel.try_receive() {
            pool.release(desc.into_buffer());
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for CaptureQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
