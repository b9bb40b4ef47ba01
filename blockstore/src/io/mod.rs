mod block;
mod caching;
mod file;

pub use block::BlockStore;
pub use caching::{CacheStats, CachingBlockStore, DEFAULT_CACHE_CAPACITY};
pub use file::FileBackedBlockStore;
