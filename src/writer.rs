/// Frame Writer: serializes the session header and framed packet records
/// onto the shared console transport.
///
/// The transport also carries text logs, so the writer never assumes it owns
/// the byte stream: records are self-delimiting (see `frame`), and the header
/// is only repeated when the link type changes.
use alloc::vec::Vec;
use core::convert::Infallible;

use crate::error::{CaptureError, Result};
use crate::frame::{
    record_prefix, LinkType, RecordHeader, SessionHeader, Timestamp, END_MARKER,
};

/// Byte-oriented output the capture stream is written to.
///
/// Assumed always writable; back-pressure is not modelled.
pub trait CaptureSink {
    type Error: core::fmt::Debug;

    fn write_all(&mut self, bytes: &[u8]) -> core::result::Result<(), Self::Error>;

    fn flush(&mut self) -> core::result::Result<(), Self::Error>;
}

/// In-memory sink, used by host tools and tests.
impl CaptureSink for Vec<u8> {
    type Error = Infallible;

    fn write_all(&mut self, bytes: &[u8]) -> core::result::Result<(), Infallible> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> core::result::Result<(), Infallible> {
        Ok(())
    }
}

pub struct FrameWriter<S> {
    sink: S,
    is_open: bool,
    /// Link type of the last header put on the transport since boot
    announced: Option<LinkType>,
}

impl<S: CaptureSink> FrameWriter<S> {
    pub const fn new(sink: S) -> Self {
        Self {
            sink,
            is_open: false,
            announced: None,
        }
    }

    /// Open a capture stream for `link_type`.
    ///
    /// The session header goes out on the first open since boot, and again
    /// only when the link type differs from the one last announced.
    pub fn open(&mut self, link_type: LinkType) -> Result<()> {
        if self.is_open {
            return Err(CaptureError::InvalidState("still sniffing"));
        }

        if self.announced != Some(link_type) {
            let header = SessionHeader::new(link_type).encode();
            self.write(&header)?;
            self.flush()?;
            self.announced = Some(link_type);
            log::info!("Capture stream opened ({})", link_type.as_str());
        } else {
            log::info!("Capture stream reopened ({})", link_type.as_str());
        }

        self.is_open = true;
        Ok(())
    }

    /// Frame one packet: start marker, length, record header, payload, end
    /// marker. `original_len` is the on-air length before any truncation.
    pub fn write_record(
        &mut self,
        payload: &[u8],
        original_len: u32,
        timestamp: Timestamp,
    ) -> Result<()> {
        if !self.is_open {
            return Err(CaptureError::InvalidState("no capture stream is open"));
        }

        let len = payload.len() as u32;
        let header = RecordHeader {
            timestamp,
            captured_len: len,
            original_len: original_len.max(len),
        };

        self.write(&record_prefix(len))?;
        self.write(&header.encode())?;
        self.write(payload)?;
        self.write(&END_MARKER.to_le_bytes())?;
        self.flush()
    }

    /// Flush and close the stream. Closing twice is an error.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(CaptureError::InvalidState("capture stream is already closed"));
        }
        self.is_open = false;
        self.flush()
    }

    /// Push buffered bytes out. Called per record and by the flush timer.
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush().map_err(|e| {
            log::warn!("Capture stream flush failed: {:?}", e);
            CaptureError::Transport
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn link_type(&self) -> Option<LinkType> {
        self.announced
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes).map_err(|e| {
            log::warn!("Capture stream write failed: {:?}", e);
            CaptureError::Transport
        })
    }
}
