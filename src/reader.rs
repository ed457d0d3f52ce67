/// Host-side reader for the capture stream.
///
/// Feeds on raw console bytes (log text and capture data interleaved) and
/// pulls out session headers and framed records. Any candidate that fails
/// validation costs one byte of resynchronization, so a marker pattern that
/// happens to appear inside log text or a payload cannot derail the reader.
use alloc::vec::Vec;

use crate::frame::{
    read_u32, LinkType, RecordHeader, SessionHeader, END_MARKER, MAX_RECORD_LEN, PCAP_MAGIC,
    PCAP_VERSION_MAJOR, PCAP_VERSION_MINOR, RECORD_HEADER_LEN, RECORD_PREFIX_LEN,
    SESSION_HEADER_LEN, START_MARKER,
};
use crate::writer::CaptureSink;

/// A record recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Header(SessionHeader),
    Record(CapturedRecord),
}

#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    skipped: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes discarded so far as non-capture data.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Bytes held waiting for more input.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let start = START_MARKER.to_le_bytes();
        let magic = PCAP_MAGIC.to_le_bytes();

        loop {
            let Some(at) = self
                .buf
                .windows(4)
                .position(|w| w == start || w == magic)
            else {
                // A marker may straddle the next push
                let keep = self.buf.len().min(3);
                self.discard(self.buf.len() - keep);
                return None;
            };
            self.discard(at);

            if self.buf[..4] == magic {
                if self.buf.len() < SESSION_HEADER_LEN {
                    return None;
                }
                let header = SessionHeader::decode(&self.buf)?;
                self.buf.drain(..SESSION_HEADER_LEN);
                return Some(Frame::Header(header));
            }

            match check_record(&self.buf) {
                Candidate::Noise => {
                    self.discard(1);
                    continue;
                }
                Candidate::Incomplete => {
                    // A stray marker byte fakes a long length and would hold
                    // back every record queued behind it
                    match self.complete_record_ahead() {
                        Some(at) => {
                            self.discard(at);
                            continue;
                        }
                        None => return None,
                    }
                }
                Candidate::Complete { header, total } => {
                    let body = RECORD_PREFIX_LEN + RECORD_HEADER_LEN;
                    let payload = self.buf[body..total - 4].to_vec();
                    self.buf.drain(..total);
                    return Some(Frame::Record(CapturedRecord { header, payload }));
                }
            }
        }
    }

    /// Offset of a later frame that is already complete: a record that
    /// validates, or a session header.
    fn complete_record_ahead(&self) -> Option<usize> {
        let start = START_MARKER.to_le_bytes();
        (1..self.buf.len().saturating_sub(3)).find(|&at| {
            let rest = &self.buf[at..];
            if rest[..4] == start {
                matches!(check_record(rest), Candidate::Complete { .. })
            } else {
                SessionHeader::decode(rest).is_some_and(|h| {
                    h.version_major == PCAP_VERSION_MAJOR && h.version_minor == PCAP_VERSION_MINOR
                })
            }
        })
    }

    fn discard(&mut self, count: usize) {
        self.buf.drain(..count);
        self.skipped += count;
    }
}

enum Candidate {
    Noise,
    Incomplete,
    Complete { header: RecordHeader, total: usize },
}

/// Validate a record starting at a start marker.
fn check_record(buf: &[u8]) -> Candidate {
    if buf.len() < RECORD_PREFIX_LEN {
        return Candidate::Incomplete;
    }
    let len = read_u32(buf, 4);
    if len > MAX_RECORD_LEN {
        return Candidate::Noise;
    }

    let total = RECORD_PREFIX_LEN + RECORD_HEADER_LEN + len as usize + 4;
    if buf.len() < total {
        return Candidate::Incomplete;
    }

    match RecordHeader::decode(&buf[RECORD_PREFIX_LEN..]) {
        Some(header) if header.captured_len == len && read_u32(buf, total - 4) == END_MARKER => {
            Candidate::Complete { header, total }
        }
        _ => Candidate::Noise,
    }
}

/// Writes recovered frames out as a plain pcap file.
///
/// A pcap file has a single global header, so only the first session header
/// is kept. Records seen before any header get an 802.11 header, the link
/// type the firmware captures by default.
pub struct PcapExport<S> {
    sink: S,
    link_type: Option<LinkType>,
    records: usize,
}

impl<S: CaptureSink> PcapExport<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            link_type: None,
            records: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> core::result::Result<(), S::Error> {
        match frame {
            Frame::Header(header) => {
                match self.link_type {
                    None => self.write_header(header.link_type)?,
                    Some(current) if current != header.link_type => log::warn!(
                        "Ignoring {} header in a {} capture",
                        header.link_type.as_str(),
                        current.as_str()
                    ),
                    Some(_) => {}
                }
                Ok(())
            }
            Frame::Record(record) => {
                if self.link_type.is_none() {
                    self.write_header(LinkType::Ieee80211)?;
                }
                self.sink.write_all(&record.header.encode())?;
                self.sink.write_all(&record.payload)?;
                self.records += 1;
                Ok(())
            }
        }
    }

    /// Records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn link_type(&self) -> Option<LinkType> {
        self.link_type
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> core::result::Result<S, S::Error> {
        self.sink.flush()?;
        Ok(self.sink)
    }

    fn write_header(&mut self, link_type: LinkType) -> core::result::Result<(), S::Error> {
        self.sink.write_all(&SessionHeader::new(link_type).encode())?;
        self.link_type = Some(link_type);
        Ok(())
    }
}
