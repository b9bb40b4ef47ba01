use crate::block::BlockPointer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A record failed a structural check. The store should be discarded and
    /// rebuilt rather than read again.
    #[error("corrupted block {pointer} found in {store}: {reason}")]
    Corrupted {
        store: String,
        pointer: BlockPointer,
        reason: String,
    },
    #[error("block store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload of block {pointer} grew from {reserved} to {actual} bytes")]
    PayloadOverflow {
        pointer: BlockPointer,
        reserved: usize,
        actual: usize,
    },
    #[error("cannot access a record through a null block pointer")]
    NullPointer,
    #[error("block store is not open")]
    NotOpen,
}

impl Error {
    /// Returns true for faults that mean the backing file can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupted { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
