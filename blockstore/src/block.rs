use std::cell::Cell;
use std::fmt;
use std::io::{self, Read, Write};

/// A stable byte offset of a record within a block store's backing file.
///
/// Pointers are never reused once handed out, so a pointer stays valid for
/// as long as the store is not cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPointer(i64);

impl BlockPointer {
    /// Refers to no record. Payloads use it for links that are not set yet.
    pub const NULL: BlockPointer = BlockPointer(-1);

    /// Points at the given byte offset. Offsets must fit in 63 bits.
    pub fn at(offset: u64) -> Self {
        assert!(
            offset <= i64::MAX as u64,
            "block offset {} exceeds the addressable range",
            offset
        );
        BlockPointer(offset as i64)
    }

    /// Decodes a pointer from its on-disk form, where any negative value is null.
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            BlockPointer::NULL
        } else {
            BlockPointer(raw)
        }
    }

    pub fn to_raw(self) -> i64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 < 0
    }

    pub fn offset(self) -> Option<u64> {
        if self.is_null() {
            None
        } else {
            Some(self.0 as u64)
        }
    }
}

impl Default for BlockPointer {
    fn default() -> Self {
        BlockPointer::NULL
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset() {
            Some(offset) => write!(f, "@{}", offset),
            None => f.write_str("null"),
        }
    }
}

/// The unit of storable data. Implementations are supplied by whoever sits on
/// top of the store; the store itself only frames and validates their bytes.
pub trait BlockPayload: Clone + fmt::Debug + 'static {
    /// Type tag written into every record of this kind. Tags must be unique
    /// among the payload kinds sharing a store.
    const TAG: u8;

    /// Number of bytes `write_to` produces.
    fn size(&self) -> usize;

    fn write_to<W: Write>(&self, sink: &mut W) -> io::Result<()>;

    fn read_from<R: Read>(source: &mut R) -> io::Result<Self>;
}

/// A payload that has not been given a place in a store yet.
#[derive(Clone, Debug)]
pub struct NewBlock<P> {
    payload: P,
    size: Cell<Option<usize>>,
}

impl<P: BlockPayload> NewBlock<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            size: Cell::new(None),
        }
    }

    /// The payload size, computed on first use and fixed afterwards.
    pub fn size(&self) -> usize {
        match self.size.get() {
            Some(size) => size,
            None => {
                let size = self.payload.size();
                self.size.set(Some(size));
                size
            }
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    /// Moves the payload to `pointer`. Only a store's allocator calls this.
    pub(crate) fn place(self, pointer: BlockPointer) -> Block<P> {
        let size = self.size();
        Block::with_size(pointer, self.payload, size)
    }
}

/// A payload placed at a fixed pointer.
///
/// Placed blocks only come out of a store, from `attach` or `read`, so the
/// space reserved for the payload is always known.
#[derive(Clone, Debug)]
pub struct Block<P> {
    pointer: BlockPointer,
    payload: P,
    size: usize,
}

impl<P: BlockPayload> Block<P> {
    pub(crate) fn with_size(pointer: BlockPointer, payload: P, size: usize) -> Self {
        assert!(!pointer.is_null(), "a block cannot be placed at the null pointer");
        Self {
            pointer,
            payload,
            size,
        }
    }

    pub fn pointer(&self) -> BlockPointer {
        self.pointer
    }

    /// Bytes reserved for the payload. Writing a payload that has grown past
    /// this fails.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
