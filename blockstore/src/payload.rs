//! Payload kinds that ship with the store.
use crate::block::{BlockPayload, BlockPointer};
use std::io::{self, ErrorKind, Read, Write};

/// The bootstrap record kept at offset zero. Holds the pointer to whatever
/// structure the owner of the store hangs off it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootPayload {
    pub root: BlockPointer,
}

impl RootPayload {
    pub fn new(root: BlockPointer) -> Self {
        Self { root }
    }
}

impl Default for RootPayload {
    fn default() -> Self {
        Self::new(BlockPointer::NULL)
    }
}

impl BlockPayload for RootPayload {
    const TAG: u8 = 0x55;

    fn size(&self) -> usize {
        8
    }

    fn write_to<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_all(&self.root.to_raw().to_be_bytes())
    }

    fn read_from<R: Read>(source: &mut R) -> io::Result<Self> {
        let mut buf = [0; 8];
        source.read_exact(&mut buf)?;
        Ok(Self::new(BlockPointer::from_raw(i64::from_be_bytes(buf))))
    }
}

/// Opaque bytes, stored as a big endian `u32` length followed by the bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BytesPayload {
    bytes: Vec<u8>,
}

impl BytesPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl BlockPayload for BytesPayload {
    const TAG: u8 = 0x33;

    fn size(&self) -> usize {
        4 + self.bytes.len()
    }

    fn write_to<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        if self.bytes.len() > u32::MAX as usize {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "payload exceeds 4 GiB",
            ));
        }
        sink.write_all(&(self.bytes.len() as u32).to_be_bytes())?;
        sink.write_all(&self.bytes)
    }

    fn read_from<R: Read>(source: &mut R) -> io::Result<Self> {
        let mut len = [0; 4];
        source.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as u64;

        // Bounded by what the source holds, so a damaged length cannot force a
        // huge allocation.
        let mut bytes = Vec::new();
        source.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "payload shorter than its length prefix",
            ));
        }
        Ok(Self::new(bytes))
    }
}
