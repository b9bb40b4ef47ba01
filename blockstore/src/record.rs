//! On-disk framing of a single record:
//!
//! ```text
//! | marker (1) | type tag (1) | length (4, BE) | payload (length) | count (8, BE) |
//! ```
//!
//! The trailing count repeats the number of payload bytes so a damaged length
//! field is caught even when the marker and tag still look plausible.
use byteorder::BigEndian;
use zerocopy::byteorder::{U32, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

/// Every record starts with this byte.
pub const BLOCK_MARKER: u8 = 0xCC;
pub const HEADER_SIZE: usize = 6;
pub const TAIL_SIZE: usize = 8;

/// Largest payload the length field can describe.
pub(crate) const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub(crate) struct RecordHeader {
    marker: u8,
    tag: u8,
    len: U32<BigEndian>,
}

impl RecordHeader {
    pub fn new(tag: u8, len: u32) -> Self {
        Self {
            marker: BLOCK_MARKER,
            tag,
            len: U32::new(len),
        }
    }

    /// Reads a header from exactly `HEADER_SIZE` bytes.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        LayoutVerified::<_, RecordHeader>::new_unaligned(buf).map(|header| *header)
    }

    pub fn has_marker(&self) -> bool {
        self.marker == BLOCK_MARKER
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn len(&self) -> u32 {
        self.len.get()
    }
}

#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub(crate) struct RecordTail {
    count: U64<BigEndian>,
}

impl RecordTail {
    pub fn new(count: u64) -> Self {
        Self {
            count: U64::new(count),
        }
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        LayoutVerified::<_, RecordTail>::new_unaligned(buf).map(|tail| *tail)
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }
}

/// Bytes a record with a payload of `payload_size` bytes occupies on disk.
pub fn record_len(payload_size: usize) -> u64 {
    (HEADER_SIZE + TAIL_SIZE) as u64 + payload_size as u64
}

/// Frames a serialized payload. The caller guarantees `body` fits the length field.
pub(crate) fn encode(tag: u8, body: &[u8]) -> Vec<u8> {
    debug_assert!(body.len() <= MAX_PAYLOAD_SIZE);
    let mut record = Vec::with_capacity(record_len(body.len()) as usize);
    record.extend_from_slice(RecordHeader::new(tag, body.len() as u32).as_bytes());
    record.extend_from_slice(body);
    record.extend_from_slice(RecordTail::new(body.len() as u64).as_bytes());
    record
}
