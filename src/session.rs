/// Capture Session: lifecycle of one capture pipeline.
///
/// ```text
/// Idle ──start──▶ Starting ──links up──▶ Streaming ──stop──▶ Stopping ──▶ Idle
///                    │                                           ▲
///                    └──────────── failure: roll back ───────────┘
/// ```
///
/// The session owns the pool, the queue, the frame writer and the link
/// table. It is const-constructible so the firmware can keep a single
/// instance in a `static`; the receive callbacks reach it by shared
/// reference and only ever use the non-waiting paths.
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use critical_section::Mutex as CsMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Instant};

use crate::config::{CaptureConfig, PipelineConfig, MAX_WIRED_INTERFACES, QUEUE_LEN};
use crate::error::{CaptureError, LinkError, Result};
use crate::frame::{LinkType, Timestamp};
use crate::pool::BufferPool;
use crate::producer::{self, Offer, WifiFrame};
use crate::queue::CaptureQueue;
use crate::stats::{CaptureStats, StatsSnapshot};
use crate::writer::{CaptureSink, FrameWriter};

/// Wi-Fi promiscuous-mode control.
pub trait WifiLink {
    fn enable_promiscuous(&mut self, filter_mask: u32) -> core::result::Result<(), LinkError>;

    fn disable_promiscuous(&mut self) -> core::result::Result<(), LinkError>;

    fn set_channel(&mut self, channel: u8) -> core::result::Result<(), LinkError>;
}

/// Capture path control for a wired interface.
pub trait WiredLink {
    fn enable_capture(&mut self) -> core::result::Result<(), LinkError>;

    fn disable_capture(&mut self) -> core::result::Result<(), LinkError>;
}

/// Stand-in for a link class the board does not have.
#[derive(Debug)]
pub enum NoLink {}

impl WifiLink for NoLink {
    fn enable_promiscuous(&mut self, _: u32) -> core::result::Result<(), LinkError> {
        match *self {}
    }

    fn disable_promiscuous(&mut self) -> core::result::Result<(), LinkError> {
        match *self {}
    }

    fn set_channel(&mut self, _: u8) -> core::result::Result<(), LinkError> {
        match *self {}
    }
}

impl WiredLink for NoLink {
    fn enable_capture(&mut self) -> core::result::Result<(), LinkError> {
        match *self {}
    }

    fn disable_capture(&mut self) -> core::result::Result<(), LinkError> {
        match *self {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub wifi: bool,
    pub wired: bool,
    pub channel: u8,
    pub remaining: i32,
    pub stats: StatsSnapshot,
}

struct Links<W, E> {
    wifi: Option<W>,
    wired: heapless::Vec<E, MAX_WIRED_INTERFACES>,
}

pub struct CaptureSession<S, W, E> {
    pub(crate) config: PipelineConfig,
    state: CsMutex<Cell<SessionState>>,
    pub(crate) running: AtomicBool,
    wifi_active: AtomicBool,
    wired_active: AtomicBool,
    channel: AtomicU8,
    /// Records still to write; negative means unlimited
    pub(crate) remaining: AtomicI32,
    pub(crate) pool: BufferPool,
    pub(crate) queue: CaptureQueue<QUEUE_LEN>,
    pub(crate) writer: Mutex<CriticalSectionRawMutex, FrameWriter<S>>,
    /// Also serializes `start` and `stop`
    links: Mutex<CriticalSectionRawMutex, Links<W, E>>,
    pub(crate) stats: CaptureStats,
    pub(crate) consumer_wake: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) consumer_done: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) flush_wake: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) flush_armed: AtomicBool,
    /// Unix time minus time since boot, microseconds
    wall_offset: CsMutex<Cell<i64>>,
}

impl<S, W, E> CaptureSession<S, W, E>
where
    S: CaptureSink,
    W: WifiLink,
    E: WiredLink,
{
    pub const fn new(sink: S, config: PipelineConfig) -> Self {
        Self {
            config,
            state: CsMutex::new(Cell::new(SessionState::Idle)),
            running: AtomicBool::new(false),
            wifi_active: AtomicBool::new(false),
            wired_active: AtomicBool::new(false),
            channel: AtomicU8::new(0),
            remaining: AtomicI32::new(0),
            pool: BufferPool::new(),
            queue: CaptureQueue::new(),
            writer: Mutex::new(FrameWriter::new(sink)),
            links: Mutex::new(Links {
                wifi: None,
                wired: heapless::Vec::new(),
            }),
            stats: CaptureStats::new(),
            consumer_wake: Signal::new(),
            consumer_done: Signal::new(),
            flush_wake: Signal::new(),
            flush_armed: AtomicBool::new(false),
            wall_offset: CsMutex::new(Cell::new(0)),
        }
    }

    /// Install the Wi-Fi link. Only while idle.
    pub async fn register_wifi_interface(&self, link: W) -> Result<()> {
        let mut links = self.links.lock().await;
        if self.state() != SessionState::Idle {
            return Err(CaptureError::InvalidState("cannot replace Wi-Fi link while capturing"));
        }
        links.wifi = Some(link);
        log::info!("Wi-Fi interface registered");
        Ok(())
    }

    /// Append a wired interface to the fixed-size table.
    pub async fn register_wired_interface(&self, link: E) -> Result<()> {
        let mut links = self.links.lock().await;
        if links.wired.push(link).is_err() {
            log::warn!("Maximum number of wired interfaces registered");
            return Err(CaptureError::InterfaceTableFull);
        }
        log::info!("Wired interface {} registered", links.wired.len() - 1);
        Ok(())
    }

    /// Start capturing on `channel` (1-13, anything else falls back to the
    /// default) until `packet_limit` records are written; negative means
    /// unlimited.
    ///
    /// On failure everything allocated by this call is released and the
    /// session is back in `Idle`.
    pub async fn start(&self, channel: u32, packet_limit: i32) -> Result<()> {
        let mut links = self.links.lock().await;
        if !self.transition(SessionState::Idle, SessionState::Starting) {
            return Err(CaptureError::InvalidState("capture already running"));
        }

        let cfg = CaptureConfig::new(channel, packet_limit);
        if let Err(e) = self.bring_up(&mut links, cfg).await {
            log::error!("Capture start failed: {}", e);
            self.set_state(SessionState::Idle);
            return Err(e);
        }

        self.set_state(SessionState::Streaming);
        self.consumer_wake.signal(());
        self.flush_wake.signal(());

        if cfg.is_limited() {
            log::info!("Capture started on channel {}, {} packets", cfg.channel, cfg.packet_limit);
        } else {
            log::info!("Capture started on channel {}", cfg.channel);
        }
        Ok(())
    }

    async fn bring_up(&self, links: &mut Links<W, E>, cfg: CaptureConfig) -> Result<()> {
        self.pool
            .allocate(self.config.pool_buffers, self.config.buffer_size)?;

        let link_type = if self.config.wifi {
            LinkType::Ieee80211
        } else {
            LinkType::Ethernet
        };
        if let Err(e) = self.writer.lock().await.open(link_type) {
            self.pool.retire();
            return Err(e);
        }

        self.stats.reset();
        self.remaining.store(cfg.packet_limit, Ordering::Release);
        self.channel.store(cfg.channel, Ordering::Relaxed);
        self.consumer_done.reset();
        self.queue.open();
        self.flush_armed.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);

        if self.config.wifi {
            match links.wifi.as_mut() {
                Some(wifi) => match enable_wifi(wifi, self.config.filter_mask, cfg.channel) {
                    Ok(()) => {
                        self.wifi_active.store(true, Ordering::Release);
                        log::info!("Wi-Fi promiscuous mode enabled on channel {}", cfg.channel);
                    }
                    Err(e) => log::warn!("Failed to enable Wi-Fi capture: {}", e),
                },
                None => log::warn!("No Wi-Fi interface registered"),
            }
        }

        if let Some(wired) = links.wired.first_mut() {
            match wired.enable_capture() {
                Ok(()) => {
                    self.wired_active.store(true, Ordering::Release);
                    log::info!("Wired capture enabled");
                }
                Err(e) => log::warn!("Failed to enable wired capture: {}", e),
            }
        }

        if !self.wifi_active.load(Ordering::Acquire) && !self.wired_active.load(Ordering::Acquire) {
            self.running.store(false, Ordering::Release);
            self.release_resources().await;
            return Err(CaptureError::NoInterface);
        }
        Ok(())
    }

    /// Stop capturing. `InvalidState` if the session is not streaming.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown(true).await
    }

    /// Teardown shared by host `stop` and the consumer's limit stop. The
    /// consumer must not wait for its own exit.
    pub(crate) async fn shutdown(&self, wait_for_consumer: bool) -> Result<()> {
        let mut links = self.links.lock().await;
        if !self.transition(SessionState::Streaming, SessionState::Stopping) {
            return Err(CaptureError::InvalidState("capture not running"));
        }

        if self.wifi_active.swap(false, Ordering::AcqRel) {
            if let Some(wifi) = links.wifi.as_mut() {
                if let Err(e) = wifi.disable_promiscuous() {
                    log::warn!("Failed to disable Wi-Fi capture: {}", e);
                }
            }
        }
        if self.wired_active.swap(false, Ordering::AcqRel) {
            if let Some(wired) = links.wired.first_mut() {
                if let Err(e) = wired.disable_capture() {
                    log::warn!("Failed to disable wired capture: {}", e);
                }
            }
        }

        self.running.store(false, Ordering::Release);

        // An unlimited consumer only notices at its next dequeue timeout and
        // is not waited on; an exhausted one is stopping itself.
        if wait_for_consumer && self.remaining.load(Ordering::Acquire) > 0 {
            let wait = self.config.consumer_exit_wait;
            if with_timeout(wait, self.consumer_done.wait()).await.is_err() {
                log::warn!("Consumer did not exit within {} ms", wait.as_millis());
            }
        }

        self.release_resources().await;
        self.set_state(SessionState::Idle);

        let stats = self.stats.snapshot();
        log::info!(
            "Capture stopped: {} written, {} dropped, {} discarded",
            stats.written,
            stats.dropped(),
            stats.discarded
        );
        Ok(())
    }

    /// Close the queue and writer and hand the pool back.
    async fn release_resources(&self) {
        self.queue.close();
        let discarded = self.queue.drain(&self.pool);
        if discarded > 0 {
            self.stats.discarded(discarded);
            log::debug!("Discarded {} queued packets", discarded);
        }

        self.flush_armed.store(false, Ordering::Release);

        let mut writer = self.writer.lock().await;
        if writer.is_open() {
            if let Err(e) = writer.close() {
                log::warn!("Failed to close capture stream: {}", e);
            }
        }
        drop(writer);

        let outstanding = self.pool.retire();
        if outstanding > 0 {
            log::debug!("{} packet buffers still in flight, pool released on return", outstanding);
        }
    }

    /// Wi-Fi receive callback entry point. Never waits.
    ///
    /// Returns `None` when the frame was ignored (capture off, MISC frame,
    /// or receive error).
    pub fn on_wifi_frame(&self, frame: &WifiFrame<'_>) -> Option<Offer> {
        if !self.wifi_active.load(Ordering::Acquire) || !frame.is_capturable() {
            return None;
        }
        let len = frame.capture_len();
        Some(producer::offer(
            &self.pool,
            &self.queue,
            &self.stats,
            &frame.payload[..len],
            len,
            frame.timestamp(),
        ))
    }

    /// Wired receive callback entry point. Never waits.
    ///
    /// The frame is only borrowed: the driver reclaims its buffer once this
    /// returns, whether or not the packet was captured.
    pub fn on_wired_frame(&self, frame: &[u8]) -> Option<Offer> {
        if !self.wired_active.load(Ordering::Acquire) {
            return None;
        }
        Some(producer::offer(
            &self.pool,
            &self.queue,
            &self.stats,
            frame,
            frame.len(),
            self.wall_clock(),
        ))
    }

    /// Anchor software timestamps to Unix time.
    pub fn set_wall_clock(&self, unix_micros: u64) {
        let offset = unix_micros as i64 - Instant::now().as_micros() as i64;
        critical_section::with(|cs| self.wall_offset.borrow(cs).set(offset));
    }

    /// Current wall-clock time as used for wired frames.
    pub fn wall_clock(&self) -> Timestamp {
        let offset = critical_section::with(|cs| self.wall_offset.borrow(cs).get());
        let now = Instant::now().as_micros() as i64 + offset;
        Timestamp::from_micros(now.max(0) as u64)
    }

    pub fn state(&self) -> SessionState {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            wifi: self.wifi_active.load(Ordering::Acquire),
            wired: self.wired_active.load(Ordering::Acquire),
            channel: self.channel.load(Ordering::Relaxed),
            remaining: self.remaining.load(Ordering::Acquire),
            stats: self.stats.snapshot(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn queue(&self) -> &CaptureQueue<QUEUE_LEN> {
        &self.queue
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `f` against the frame writer, e.g. to inspect an in-memory sink.
    pub async fn with_writer<R>(&self, f: impl FnOnce(&mut FrameWriter<S>) -> R) -> R {
        f(&mut *self.writer.lock().await)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            if state.get() == from {
                state.set(to);
                true
            } else {
                false
            }
        })
    }

    fn set_state(&self, to: SessionState) {
        critical_section::with(|cs| self.state.borrow(cs).set(to));
    }
}

fn enable_wifi<W: WifiLink>(
    wifi: &mut W,
    filter_mask: u32,
    channel: u8,
) -> core::result::Result<(), LinkError> {
    wifi.enable_promiscuous(filter_mask)?;
    if let Err(e) = wifi.set_channel(channel) {
        let _ = wifi.disable_promiscuous();
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::UNLIMITED;
    use crate::frame::SESSION_HEADER_LEN;
    use crate::producer::WifiPacketKind;
    use crate::reader::{Frame, FrameReader};
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::{Duration, Timer};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::vec::Vec;

    /// Shared view of a mock link's state.
    #[derive(Default)]
    pub(crate) struct LinkState {
        pub enabled: AtomicBool,
        pub channel: AtomicU8,
        pub fail_enable: AtomicBool,
        pub enables: AtomicU32,
    }

    pub(crate) struct MockLink(pub Arc<LinkState>);

    impl MockLink {
        pub fn new() -> (Self, Arc<LinkState>) {
            let state = Arc::new(LinkState::default());
            (Self(state.clone()), state)
        }

        fn enable(&mut self) -> core::result::Result<(), LinkError> {
            if self.0.fail_enable.load(Ordering::Relaxed) {
                return Err(LinkError::Driver(-1));
            }
            self.0.enables.fetch_add(1, Ordering::Relaxed);
            self.0.enabled.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    impl WifiLink for MockLink {
        fn enable_promiscuous(&mut self, _: u32) -> core::result::Result<(), LinkError> {
            self.enable()
        }

        fn disable_promiscuous(&mut self) -> core::result::Result<(), LinkError> {
            self.0.enabled.store(false, Ordering::Relaxed);
            Ok(())
        }

        fn set_channel(&mut self, channel: u8) -> core::result::Result<(), LinkError> {
            self.0.channel.store(channel, Ordering::Relaxed);
            Ok(())
        }
    }

    impl WiredLink for MockLink {
        fn enable_capture(&mut self) -> core::result::Result<(), LinkError> {
            self.enable()
        }

        fn disable_capture(&mut self) -> core::result::Result<(), LinkError> {
            self.0.enabled.store(false, Ordering::Relaxed);
            Ok(())
        }
    }

    pub(crate) type TestSession = CaptureSession<Vec<u8>, MockLink, MockLink>;

    pub(crate) fn wifi_session(config: PipelineConfig) -> (TestSession, Arc<LinkState>) {
        let session = CaptureSession::new(Vec::new(), config);
        let (link, state) = MockLink::new();
        block_on(session.register_wifi_interface(link)).unwrap();
        (session, state)
    }

    pub(crate) fn data_frame(payload: &[u8]) -> WifiFrame<'_> {
        WifiFrame {
            kind: WifiPacketKind::Data,
            rx_state: 0,
            sig_len: payload.len() as u32,
            timestamp_us: 1_000_042,
            payload,
        }
    }

    fn sink_len(session: &TestSession) -> usize {
        block_on(session.with_writer(|w| w.sink().len()))
    }

    #[test]
    fn start_then_stop_releases_everything() {
        let (session, wifi) = wifi_session(PipelineConfig::new());
        block_on(session.start(6, UNLIMITED)).unwrap();

        assert_eq!(session.state(), SessionState::Streaming);
        assert!(wifi.enabled.load(Ordering::Relaxed));
        assert_eq!(wifi.channel.load(Ordering::Relaxed), 6);
        assert_eq!(session.pool().free_count(), session.pool().capacity());
        assert!(block_on(session.with_writer(|w| w.is_open())));

        block_on(session.stop()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!wifi.enabled.load(Ordering::Relaxed));
        assert!(!session.pool().is_allocated());
        assert!(!session.queue().is_open());
        assert!(!block_on(session.with_writer(|w| w.is_open())));
    }

    #[test]
    fn stop_on_idle_session_is_invalid_state() {
        let (session, _) = wifi_session(PipelineConfig::new());
        assert_eq!(
            block_on(session.stop()),
            Err(CaptureError::InvalidState("capture not running"))
        );
        assert!(!session.pool().is_allocated());
        assert!(!session.queue().is_open());
        assert!(session.queue().is_empty());
        assert_eq!(sink_len(&session), 0);
    }

    #[test]
    fn start_while_running_is_invalid_state() {
        let (session, _) = wifi_session(PipelineConfig::new());
        block_on(session.start(1, UNLIMITED)).unwrap();
        assert!(matches!(
            block_on(session.start(1, UNLIMITED)),
            Err(CaptureError::InvalidState(_))
        ));
        assert_eq!(session.state(), SessionState::Streaming);
        block_on(session.stop()).unwrap();
    }

    #[test]
    fn channel_is_clamped() {
        let (session, wifi) = wifi_session(PipelineConfig::new());
        block_on(session.start(42, UNLIMITED)).unwrap();
        assert_eq!(wifi.channel.load(Ordering::Relaxed), 1);
        assert_eq!(session.status().channel, 1);
        block_on(session.stop()).unwrap();
    }

    #[test]
    fn header_is_written_once_across_restarts() {
        let (session, _) = wifi_session(PipelineConfig::new());
        block_on(session.start(1, UNLIMITED)).unwrap();
        block_on(session.stop()).unwrap();
        block_on(session.start(1, UNLIMITED)).unwrap();
        block_on(session.stop()).unwrap();
        assert_eq!(sink_len(&session), SESSION_HEADER_LEN);
    }

    #[test]
    fn allocation_failure_rolls_back() {
        let (session, wifi) =
            wifi_session(PipelineConfig::new().with_pool(4, usize::MAX));
        assert_eq!(
            block_on(session.start(1, UNLIMITED)),
            Err(CaptureError::BufferAlloc { index: 0 })
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.pool().is_allocated());
        assert!(!wifi.enabled.load(Ordering::Relaxed));
        assert!(!block_on(session.with_writer(|w| w.is_open())));
        assert_eq!(sink_len(&session), 0);
    }

    #[test]
    fn no_interface_rolls_back() {
        let session: TestSession = CaptureSession::new(Vec::new(), PipelineConfig::new());
        assert_eq!(
            block_on(session.start(1, UNLIMITED)),
            Err(CaptureError::NoInterface)
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_running());
        assert!(!session.pool().is_allocated());
        assert!(!session.queue().is_open());
        assert!(!block_on(session.with_writer(|w| w.is_open())));
    }

    #[test]
    fn failed_wifi_enable_without_wired_fails_start() {
        let (session, wifi) = wifi_session(PipelineConfig::new());
        wifi.fail_enable.store(true, Ordering::Relaxed);
        assert_eq!(
            block_on(session.start(1, UNLIMITED)),
            Err(CaptureError::NoInterface)
        );

        // Retry after the driver recovers
        wifi.fail_enable.store(false, Ordering::Relaxed);
        block_on(session.start(1, UNLIMITED)).unwrap();
        block_on(session.stop()).unwrap();
    }

    #[test]
    fn wired_keeps_session_up_when_wifi_fails() {
        let (session, wifi) = wifi_session(PipelineConfig::new());
        let (eth, eth_state) = MockLink::new();
        block_on(session.register_wired_interface(eth)).unwrap();
        wifi.fail_enable.store(true, Ordering::Relaxed);

        block_on(session.start(1, UNLIMITED)).unwrap();
        let status = session.status();
        assert!(!status.wifi);
        assert!(status.wired);
        assert!(eth_state.enabled.load(Ordering::Relaxed));

        // Wi-Fi frames are ignored, wired frames flow
        assert_eq!(session.on_wifi_frame(&data_frame(&[0; 16])), None);
        assert_eq!(session.on_wired_frame(&[1; 60]), Some(Offer::Queued));

        block_on(session.stop()).unwrap();
        assert!(!eth_state.enabled.load(Ordering::Relaxed));
        assert_eq!(session.stats().discarded, 1);
    }

    #[test]
    fn wifi_and_wired_share_one_802_11_stream() {
        let (session, wifi) = wifi_session(PipelineConfig::new());
        let (eth, eth_state) = MockLink::new();
        block_on(session.register_wired_interface(eth)).unwrap();

        block_on(session.start(6, UNLIMITED)).unwrap();
        let status = session.status();
        assert!(status.wifi && status.wired);
        assert!(wifi.enabled.load(Ordering::Relaxed));
        assert!(eth_state.enabled.load(Ordering::Relaxed));

        assert_eq!(session.on_wifi_frame(&data_frame(&[0x80; 28])), Some(Offer::Queued));
        assert_eq!(session.on_wired_frame(&[0x45; 60]), Some(Offer::Queued));

        block_on(join(session.run_consumer(), async {
            while !session.queue().is_empty() {
                Timer::after(Duration::from_millis(1)).await;
            }
            session.stop().await.unwrap();
        }));
        assert!(!wifi.enabled.load(Ordering::Relaxed));
        assert!(!eth_state.enabled.load(Ordering::Relaxed));
        assert_eq!(session.stats().written, 2);

        let out = block_on(session.with_writer(|w| w.sink().clone()));
        let mut reader = FrameReader::new();
        reader.push(&out);
        let frames: Vec<_> = core::iter::from_fn(|| reader.next_frame()).collect();
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Frame::Header(h) if h.link_type == LinkType::Ieee80211));
        assert!(matches!(&frames[1], Frame::Record(r) if r.payload == [0x80; 24]));
        assert!(matches!(&frames[2], Frame::Record(r) if r.payload == [0x45; 60]));
    }

    #[test]
    fn wired_table_is_bounded() {
        let session: TestSession = CaptureSession::new(Vec::new(), PipelineConfig::new());
        for _ in 0..MAX_WIRED_INTERFACES {
            block_on(session.register_wired_interface(MockLink::new().0)).unwrap();
        }
        assert_eq!(
            block_on(session.register_wired_interface(MockLink::new().0)),
            Err(CaptureError::InterfaceTableFull)
        );
    }

    #[test]
    fn wired_only_session_uses_ethernet_link_type() {
        let session: TestSession =
            CaptureSession::new(Vec::new(), PipelineConfig::new().wired_only());
        let (wifi, wifi_state) = MockLink::new();
        block_on(session.register_wifi_interface(wifi)).unwrap();
        block_on(session.register_wired_interface(MockLink::new().0)).unwrap();

        block_on(session.start(1, UNLIMITED)).unwrap();
        assert!(!wifi_state.enabled.load(Ordering::Relaxed));
        assert_eq!(
            block_on(session.with_writer(|w| w.link_type())),
            Some(LinkType::Ethernet)
        );
        block_on(session.stop()).unwrap();
    }

    #[test]
    fn wifi_link_cannot_be_replaced_while_streaming() {
        let (session, _) = wifi_session(PipelineConfig::new());
        block_on(session.start(1, UNLIMITED)).unwrap();
        assert!(matches!(
            block_on(session.register_wifi_interface(MockLink::new().0)),
            Err(CaptureError::InvalidState(_))
        ));
        block_on(session.stop()).unwrap();
    }

    #[test]
    fn frames_are_ignored_while_idle() {
        let (session, _) = wifi_session(PipelineConfig::new());
        assert_eq!(session.on_wifi_frame(&data_frame(&[0; 32])), None);
        assert_eq!(session.on_wired_frame(&[0; 32]), None);
        assert_eq!(session.stats().received, 0);
    }

    #[test]
    fn wifi_frames_lose_fcs_and_misc_frames_are_skipped() {
        let (session, _) = wifi_session(PipelineConfig::new());
        block_on(session.start(1, UNLIMITED)).unwrap();

        let payload = [0x80u8; 64];
        assert_eq!(session.on_wifi_frame(&data_frame(&payload)), Some(Offer::Queued));
        let mut misc = data_frame(&payload);
        misc.kind = WifiPacketKind::Misc;
        assert_eq!(session.on_wifi_frame(&misc), None);

        let desc = block_on(session.queue().dequeue(Duration::from_millis(10))).unwrap();
        assert_eq!(desc.len(), 60);
        assert_eq!(desc.timestamp(), Timestamp::new(1, 42));
        session.pool().release(desc.into_buffer());

        block_on(session.stop()).unwrap();
    }

    #[test]
    fn queued_packets_are_released_at_stop() {
        let (session, _) = wifi_session(PipelineConfig::new());
        block_on(session.start(1, UNLIMITED)).unwrap();
        for _ in 0..10 {
            session.on_wifi_frame(&data_frame(&[7; 100]));
        }
        assert_eq!(session.pool().free_count(), session.pool().capacity() - 10);

        block_on(session.stop()).unwrap();
        assert_eq!(session.stats().discarded, 10);
        assert!(!session.pool().is_allocated());
    }

    #[test]
    fn restart_waits_for_retiring_pool() {
        let (session, _) = wifi_session(PipelineConfig::new());
        block_on(session.start(1, UNLIMITED)).unwrap();

        // A buffer still held by a slow consumer
        let held = session.pool().acquire().unwrap();
        block_on(session.stop()).unwrap();
        assert!(session.pool().is_allocated());
        assert!(matches!(
            block_on(session.start(1, UNLIMITED)),
            Err(CaptureError::InvalidState(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        session.pool().release(held);
        assert!(!session.pool().is_allocated());
        block_on(session.start(1, UNLIMITED)).unwrap();
        block_on(session.stop()).unwrap();
    }

    #[test]
    fn wall_clock_anchors_wired_timestamps() {
        let session: TestSession = CaptureSession::new(Vec::new(), PipelineConfig::new());
        session.set_wall_clock(1_700_000_000_000_000);
        let ts = session.wall_clock();
        assert!(ts.seconds >= 1_700_000_000);
        assert!(ts.seconds < 1_700_000_010);
    }
}
