//! espcap: live packet capture for ESP32 sensor nodes.
//!
//! Frames received by the Wi-Fi sniffer (or a registered wired interface)
//! are copied into a fixed pool of buffers from the driver's receive
//! callback, queued without ever blocking that callback, and written by a
//! background consumer as framed pcap records onto the console, the same
//! byte stream that carries the text logs. On the host, [`reader::FrameReader`]
//! resynchronizes on the record markers and [`reader::PcapExport`] writes the
//! recovered frames out as a standard pcap file.
//!
//! ```text
//! link driver ─▶ producer ─▶ pool ─▶ queue ─▶ consumer ─▶ writer ─▶ console
//!                             ▲                  │
//!                             └──── release ─────┘
//! ```
//!
//! The library is `no_std` (with `alloc` for buffer storage) and has no
//! platform dependencies, so the whole pipeline is testable on the host with
//! `cargo test`. The firmware binary (`--features xiao` or `devkitc`) supplies
//! the radio, the console sink, and the tasks.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod board;
pub mod comm;
pub mod config;
mod consumer;
pub mod error;
pub mod frame;
pub mod pool;
pub mod producer;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod session;
pub mod stats;
pub mod writer;

pub use error::{CaptureError, LinkError, Result};
pub use session::{CaptureSession, NoLink, SessionState, WifiLink, WiredLink};
pub use writer::CaptureSink;
