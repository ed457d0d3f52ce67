/// Capture pipeline configuration.
///
/// Sizes and intervals are compile-time constants; `PipelineConfig` fixes the
/// pool geometry and link options when a session is constructed, and
/// `CaptureConfig` carries the per-start parameters.
use embassy_time::Duration;

/// Number of pre-allocated packet buffers
pub const POOL_BUFFERS: usize = 16;

/// Upper bound on pool buffers (one bit per buffer in the free mask)
pub const MAX_POOL_BUFFERS: usize = 32;

/// Size of each packet buffer in bytes (largest 802.11 frame plus slack)
pub const BUFFER_SIZE: usize = 2048;

/// Capture queue slots
pub const QUEUE_LEN: usize = 64;

/// Bounded wait on dequeue; also the consumer's cancellation latency
pub const PROCESS_TIMEOUT: Duration = Duration::from_millis(100);

/// Periodic forced flush of the capture stream
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// How long a finite-limit stop waits for the consumer to acknowledge exit
pub const CONSUMER_EXIT_WAIT: Duration = Duration::from_millis(1000);

/// Wired interface table slots
pub const MAX_WIRED_INTERFACES: usize = 3;

/// 2.4 GHz channel range accepted by `start`
pub const MIN_CHANNEL: u8 = 1;
pub const MAX_CHANNEL: u8 = 13;
pub const DEFAULT_CHANNEL: u8 = 1;

/// Trailing 802.11 frame check sequence stripped from Wi-Fi frames
pub const WIFI_FCS_LEN: usize = 4;

/// Promiscuous filter mask selecting every frame type
pub const FILTER_MASK_ALL: u32 = 0xFFFF_FFFF;

/// Pipeline geometry and link options, fixed for the lifetime of a session
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of packet buffers allocated at start (clamped to `MAX_POOL_BUFFERS`)
    pub pool_buffers: usize,
    /// Bytes per packet buffer; longer frames are truncated
    pub buffer_size: usize,
    /// Promiscuous filter mask handed to the Wi-Fi link
    pub filter_mask: u32,
    /// Whether Wi-Fi capture is requested (selects the 802.11 link type)
    pub wifi: bool,
    /// Bound on the finite-limit stop's wait for the consumer
    pub consumer_exit_wait: Duration,
}

impl PipelineConfig {
    pub const fn new() -> Self {
        Self {
            pool_buffers: POOL_BUFFERS,
            buffer_size: BUFFER_SIZE,
            filter_mask: FILTER_MASK_ALL,
            wifi: true,
            consumer_exit_wait: CONSUMER_EXIT_WAIT,
        }
    }

    pub const fn with_pool(mut self, buffers: usize, buffer_size: usize) -> Self {
        self.pool_buffers = buffers;
        self.buffer_size = buffer_size;
        self
    }

    pub const fn wired_only(mut self) -> Self {
        self.wifi = false;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet limit value meaning "capture until stopped"
pub const UNLIMITED: i32 = -1;

/// Parameters of one `start` call, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub channel: u8,
    /// Remaining records to write; negative means unlimited
    pub packet_limit: i32,
}

impl CaptureConfig {
    /// Normalize raw start arguments. Out-of-range channels fall back to
    /// `DEFAULT_CHANNEL`; any negative limit means unlimited.
    pub fn new(channel: u32, packet_limit: i32) -> Self {
        let channel = if (MIN_CHANNEL as u32..=MAX_CHANNEL as u32).contains(&channel) {
            channel as u8
        } else {
            DEFAULT_CHANNEL
        };
        Self {
            channel,
            packet_limit: packet_limit.max(UNLIMITED),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.packet_limit >= 0
    }
}
