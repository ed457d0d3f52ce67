/// Error types for the capture pipeline.
///
/// Resource exhaustion on the receive path (no free buffer, full queue) is
/// not an error: those packets are dropped and counted in `stats`.
use thiserror::Error;

/// Failure reported by a link capability (Wi-Fi or wired driver).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("interface not available")]
    Unavailable,

    #[error("driver error {0}")]
    Driver(i32),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// Operation not allowed in the current lifecycle state
    /// (start while running, stop while idle, double close, ...)
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A pool buffer could not be allocated; nothing from the attempt survives
    #[error("failed to allocate packet buffer {index}")]
    BufferAlloc { index: usize },

    #[error("no capture interface could be enabled")]
    NoInterface,

    #[error("maximum number of wired interfaces registered")]
    InterfaceTableFull,

    #[error("capture transport write failed")]
    Transport,
}

pub type Result<T> = core::result::Result<T, CaptureError>;
