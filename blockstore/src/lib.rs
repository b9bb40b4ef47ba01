//! Append-only block storage for on-disk caches and index structures.
//!
//! Blocks are framed records in a single file, addressed by their byte
//! offset. [`FileBackedBlockStore`] owns the file format and detects damaged
//! records; [`CachingBlockStore`] sits in front of it, buffering writes until
//! they are flushed and caching hot payload kinds.
//!
//! The stores assume a single writer. Sharing one between threads or
//! processes needs a lock held by the owner of the store.
mod alloc;
mod block;
mod config;
mod error;
pub mod io;
mod payload;
mod record;

pub use crate::block::{Block, BlockPayload, BlockPointer, NewBlock};
pub use crate::config::StoreBuilder;
pub use crate::error::{Error, Result};
pub use crate::io::{
    BlockStore, CacheStats, CachingBlockStore, FileBackedBlockStore, DEFAULT_CACHE_CAPACITY,
};
pub use crate::payload::{BytesPayload, RootPayload};
pub use crate::record::{record_len, BLOCK_MARKER, HEADER_SIZE, TAIL_SIZE};
