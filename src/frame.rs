//! On-wire format of the capture stream.
//!
//! The console carries text logs and capture data on one byte stream. The
//! session header is the standard 24-byte pcap global header, written once per
//! opened stream. Each packet is framed so a receiver can find it amid log
//! text:
//!
//! ```text
//! | start marker | record len | pcap record header | payload | end marker |
//! |   4 bytes    |  4 bytes   |      16 bytes      |  len    |  4 bytes   |
//! ```
//!
//! All integers are little-endian.

/// Start-of-record marker
pub const START_MARKER: u32 = 0xAAAA_AAAA;

/// End-of-record marker
pub const END_MARKER: u32 = 0x5555_5555;

/// pcap magic for microsecond timestamps
pub const PCAP_MAGIC: u32 = 0xA1B2_C3D4;
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;
pub const PCAP_TIME_ZONE_GMT: i32 = 0;
pub const PCAP_SNAPLEN: u32 = 65535;

pub const SESSION_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

/// Marker + length prefix ahead of the record header
pub const RECORD_PREFIX_LEN: usize = 8;

/// Bytes framed around every payload
pub const FRAME_OVERHEAD: usize = RECORD_PREFIX_LEN + RECORD_HEADER_LEN + 4;

/// Largest record length a reader accepts before treating the marker as noise
pub const MAX_RECORD_LEN: u32 = 65535;

/// Captured medium, as recorded in the session header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    Ieee80211,
    Other(u32),
}

impl LinkType {
    pub const fn as_u32(self) -> u32 {
        match self {
            LinkType::Ethernet => 1,
            LinkType::Ieee80211 => 105,
            LinkType::Other(v) => v,
        }
    }

    pub const fn from_u32(v: u32) -> Self {
        match v {
            1 => LinkType::Ethernet,
            105 => LinkType::Ieee80211,
            v => LinkType::Other(v),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Ethernet => "ethernet",
            LinkType::Ieee80211 => "802.11",
            LinkType::Other(_) => "other",
        }
    }
}

/// Capture time, split the way pcap stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds: u32,
    pub microseconds: u32,
}

impl Timestamp {
    pub const fn new(seconds: u32, microseconds: u32) -> Self {
        Self {
            seconds,
            microseconds,
        }
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self {
            seconds: (micros / 1_000_000) as u32,
            microseconds: (micros % 1_000_000) as u32,
        }
    }
}

/// pcap global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub time_zone: i32,
    pub snaplen: u32,
    pub link_type: LinkType,
}

impl SessionHeader {
    pub const fn new(link_type: LinkType) -> Self {
        Self {
            version_major: PCAP_VERSION_MAJOR,
            version_minor: PCAP_VERSION_MINOR,
            time_zone: PCAP_TIME_ZONE_GMT,
            snaplen: PCAP_SNAPLEN,
            link_type,
        }
    }

    pub fn encode(&self) -> [u8; SESSION_HEADER_LEN] {
        let mut out = [0u8; SESSION_HEADER_LEN];
        out[0..4].copy_from_slice(&PCAP_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        out[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.time_zone.to_le_bytes());
        // sigfigs: always zero
        out[16..20].copy_from_slice(&self.snaplen.to_le_bytes());
        out[20..24].copy_from_slice(&self.link_type.as_u32().to_le_bytes());
        out
    }

    /// Parse a header; `None` if too short or the magic does not match.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SESSION_HEADER_LEN || read_u32(bytes, 0) != PCAP_MAGIC {
            return None;
        }
        Some(Self {
            version_major: u16::from_le_bytes([bytes[4], bytes[5]]),
            version_minor: u16::from_le_bytes([bytes[6], bytes[7]]),
            time_zone: read_u32(bytes, 8) as i32,
            snaplen: read_u32(bytes, 16),
            link_type: LinkType::from_u32(read_u32(bytes, 20)),
        })
    }
}

/// pcap per-packet record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub timestamp: Timestamp,
    pub captured_len: u32,
    pub original_len: u32,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        out[0..4].copy_from_slice(&self.timestamp.seconds.to_le_bytes());
        out[4..8].copy_from_slice(&self.timestamp.microseconds.to_le_bytes());
        out[8..12].copy_from_slice(&self.captured_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.original_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_LEN {
            return None;
        }
        Some(Self {
            timestamp: Timestamp::new(read_u32(bytes, 0), read_u32(bytes, 4)),
            captured_len: read_u32(bytes, 8),
            original_len: read_u32(bytes, 12),
        })
    }
}

/// Start marker followed by the record length.
pub fn record_prefix(len: u32) -> [u8; RECORD_PREFIX_LEN] {
    let mut out = [0u8; RECORD_PREFIX_LEN];
    out[0..4].copy_from_slice(&START_MARKER.to_le_bytes());
    out[4..8].copy_from_slice(&len.to_le_bytes());
    out
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
