use crate::block::{Block, BlockPayload, BlockPointer, NewBlock};
use crate::error::Result;
use std::fmt;

/// Read/write/allocate contract shared by the file store and the caching
/// layer that wraps it.
///
/// A store has a single logical writer. Callers sharing one across threads or
/// processes coordinate through an external lock.
pub trait BlockStore: fmt::Display {
    /// Opens the backing storage, creating it if absent. When the storage is
    /// empty `init` runs so the caller can write its bootstrap records.
    fn open<F>(&mut self, init: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
        Self: Sized;

    /// Releases the backing storage.
    fn close(&mut self) -> Result<()>;

    /// Drops every record and restarts allocation at offset zero.
    fn clear(&mut self) -> Result<()>;

    /// Gives an unplaced block a pointer. The block's size is computed here
    /// and the space it needs is reserved at the end of the store.
    fn attach<P: BlockPayload>(&mut self, block: NewBlock<P>) -> Result<Block<P>>;

    /// Persists the block's payload at its pointer.
    ///
    /// # Errors
    ///
    /// Fails with `PayloadOverflow` if the payload serializes to more bytes
    /// than were reserved for it.
    fn write<P: BlockPayload>(&mut self, block: &Block<P>) -> Result<()>;

    /// Reads the record at `pointer`, which must hold a payload of kind `P`.
    ///
    /// # Errors
    ///
    /// Any framing problem, including a type tag other than `P::TAG`, is
    /// reported as `Corrupted`.
    fn read<P: BlockPayload>(&mut self, pointer: BlockPointer) -> Result<Block<P>>;

    /// Reads the bootstrap record at offset zero.
    fn read_first<P: BlockPayload>(&mut self) -> Result<Block<P>>;

    /// Retires the block. Its bytes stay where they are and its pointer is
    /// never handed out again.
    fn remove<P: BlockPayload>(&mut self, block: Block<P>) -> Result<()>;

    /// Pushes buffered writes down to the backing storage.
    fn flush(&mut self) -> Result<()>;
}
