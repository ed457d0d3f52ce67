//! espcap: packet capture firmware
//!
//! Puts the Wi-Fi radio into promiscuous mode and streams every captured
//! frame as framed pcap over the console, interleaved with the text logs.
//! The host runs a resynchronizing reader on the console output and controls
//! the capture with NDJSON commands on the console input.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::convert::Infallible;

use embassy_time::{Duration, Instant, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::sniffer::{PromiscuousPkt, Sniffer};
use esp_radio::wifi::WifiController;
use static_cell::StaticCell;

use espcap::comm::{self, ErrorText, LineReader, STATUS_INTERVAL_SECS};
use espcap::config::{PipelineConfig, DEFAULT_CHANNEL, UNLIMITED};
use espcap::producer::{WifiFrame, WifiPacketKind};
use espcap::protocol::{HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};
use espcap::{board, CaptureSession, CaptureSink, LinkError, NoLink, WifiLink};

// ── Console sink ─────────────────────────────────────────────────────

/// Capture stream output: the same console esp-println logs to.
struct ConsoleSink;

impl CaptureSink for ConsoleSink {
    type Error = Infallible;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Infallible> {
        esp_println::Printer::write_bytes(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        // Printer::write_bytes flushes every call
        Ok(())
    }
}

// ── Wi-Fi link ───────────────────────────────────────────────────────

/// Promiscuous filter, as the Wi-Fi driver lays it out.
#[repr(C)]
struct PromiscuousFilter {
    filter_mask: u32,
}

// FFI bindings for channel and filter control.
// The symbols are linked via esp-radio's WiFi driver.
unsafe extern "C" {
    fn esp_wifi_set_channel(primary: u8, second: u32) -> i32;
    fn esp_wifi_set_promiscuous_filter(filter: *const PromiscuousFilter) -> i32;
}

fn check(code: i32) -> Result<(), LinkError> {
    if code == 0 {
        Ok(())
    } else {
        Err(LinkError::Driver(code))
    }
}

/// The esp-radio sniffer as the session's Wi-Fi capability.
struct RadioLink {
    sniffer: Sniffer<'static>,
}

impl WifiLink for RadioLink {
    fn enable_promiscuous(&mut self, filter_mask: u32) -> Result<(), LinkError> {
        let filter = PromiscuousFilter { filter_mask };
        check(unsafe { esp_wifi_set_promiscuous_filter(&filter) })?;
        self.sniffer.set_promiscuous_mode(true).map_err(|e| {
            log::error!("Promiscuous mode failed: {:?}", e);
            LinkError::Unavailable
        })
    }

    fn disable_promiscuous(&mut self) -> Result<(), LinkError> {
        self.sniffer
            .set_promiscuous_mode(false)
            .map_err(|_| LinkError::Unavailable)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), LinkError> {
        check(unsafe { esp_wifi_set_channel(channel, 0) })
    }
}

// ── Static capture session ───────────────────────────────────────────

/// The one capture session. Receive callbacks and tasks share it by reference.
static CAPTURE: CaptureSession<ConsoleSink, RadioLink, NoLink> =
    CaptureSession::new(ConsoleSink, PipelineConfig::new());

/// Kept alive for the lifetime of the radio.
static WIFI_CONTROLLER: StaticCell<WifiController<'static>> = StaticCell::new();

/// WiFi sniffer callback, called from the radio driver's receive context.
///
/// Only the non-waiting producer path runs here.
fn wifi_sniffer_callback(pkt: PromiscuousPkt<'_>) {
    let frame = WifiFrame {
        kind: WifiPacketKind::from_raw(pkt.frame_type as u32),
        rx_state: pkt.rx_cntl.rx_state as u32,
        sig_len: pkt.rx_cntl.sig_len as u32,
        timestamp_us: pkt.rx_cntl.timestamp as u32,
        payload: pkt.data,
    };
    let _ = CAPTURE.on_wifi_frame(&frame);
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap holds the buffer pool (allocated at each start) and the radio stack
    esp_alloc::heap_allocator!(size: board::HEAP_SIZE);

    // Start the RTOS (timer + software interrupt)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("espcap v{} starting on {}", VERSION, board::BOARD_NAME);

    // ── WiFi sniffer initialization ─────────────────────────────────────

    let (wifi_controller, wifi_interfaces) =
        esp_radio::wifi::new(peripherals.WIFI, Default::default()).expect("WiFi init failed");
    WIFI_CONTROLLER.init(wifi_controller);

    let mut sniffer = wifi_interfaces.sniffer;
    sniffer.set_receive_cb(wifi_sniffer_callback);

    CAPTURE
        .register_wifi_interface(RadioLink { sniffer })
        .await
        .expect("Wi-Fi link registration failed");

    log::info!("WiFi sniffer registered");

    spawner.spawn(consumer_task()).unwrap();
    spawner.spawn(flush_task()).unwrap();
    spawner.spawn(status_task()).unwrap();

    #[cfg(feature = "esp32")]
    {
        let rx = esp_hal::uart::UartRx::new(
            peripherals.UART0,
            esp_hal::uart::Config::default().with_baudrate(board::CONSOLE_BAUD),
        )
        .expect("Console UART init failed")
        .with_rx(peripherals.GPIO3)
        .into_async();
        spawner.spawn(command_task(rx)).unwrap();
    }

    #[cfg(not(feature = "esp32"))]
    {
        let (rx, _tx) =
            esp_hal::usb_serial_jtag::UsbSerialJtag::new(peripherals.USB_DEVICE).split();
        spawner.spawn(command_task(rx)).unwrap();
    }

    // Capture from boot; the host can restart it with other parameters
    if let Err(e) = CAPTURE.start(DEFAULT_CHANNEL as u32, UNLIMITED).await {
        log::error!("Initial capture start failed: {}", e);
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────

#[embassy_executor::task]
async fn consumer_task() {
    CAPTURE.consumer_task().await
}

#[embassy_executor::task]
async fn flush_task() {
    CAPTURE.flush_task().await
}

/// Periodic status reporting task
#[embassy_executor::task]
async fn status_task() {
    loop {
        Timer::after(Duration::from_secs(STATUS_INTERVAL_SECS)).await;
        send_status();
    }
}

/// Emit one NDJSON status line on the console.
fn send_status() {
    let uptime_secs = (Instant::now().as_millis() / 1000) as u32;
    let status = CAPTURE.status();
    let msg = comm::status_message(&status, uptime_secs);

    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(&msg, &mut buf) {
        esp_println::Printer::write_bytes(&buf[..len]);
    }
}

/// Console input for host commands.
#[cfg(feature = "esp32")]
type ConsoleRx = esp_hal::uart::UartRx<'static, esp_hal::Async>;
#[cfg(not(feature = "esp32"))]
type ConsoleRx = esp_hal::usb_serial_jtag::UsbSerialJtagRx<'static, esp_hal::Blocking>;

#[cfg(feature = "esp32")]
async fn read_console(rx: &mut ConsoleRx, buf: &mut [u8]) -> usize {
    rx.read_async(buf).await.unwrap_or(0)
}

#[cfg(not(feature = "esp32"))]
async fn read_console(rx: &mut ConsoleRx, buf: &mut [u8]) -> usize {
    loop {
        let n = rx.drain_rx_fifo(buf);
        if n > 0 {
            return n;
        }
        Timer::after(Duration::from_millis(20)).await;
    }
}

/// Host command task. Accumulates console input into lines, applies each
/// command to the capture session, and answers with NDJSON.
#[embassy_executor::task]
async fn command_task(mut rx: ConsoleRx) {
    let mut line_reader = LineReader::new();
    let mut chunk = [0u8; 64];

    loop {
        let n = read_console(&mut rx, &mut chunk).await;
        for &byte in &chunk[..n] {
            let Some(cmd) = line_reader.feed(byte).and_then(comm::parse_command) else {
                continue;
            };
            apply_command(cmd).await;
        }
    }
}

async fn apply_command(cmd: HostCommand) {
    let result = comm::handle_command(cmd, &CAPTURE).await;

    let mut text = ErrorText::new();
    let msg = comm::result_message(&cmd, &result, &mut text);
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(&msg, &mut buf) {
        esp_println::Printer::write_bytes(&buf[..len]);
    }

    if cmd == HostCommand::GetStatus {
        send_status();
    }
}
