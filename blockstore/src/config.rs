use crate::block::BlockPayload;
use crate::io::{CachingBlockStore, FileBackedBlockStore, DEFAULT_CACHE_CAPACITY};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Configures a file backed store with write-back and read caching in front.
///
/// ```no_run
/// use blockstore::{BlockStore, RootPayload, StoreBuilder};
///
/// let mut store = StoreBuilder::from("cache.bin")
///     .with_cache_capacity(256)
///     .cacheable::<RootPayload>()
///     .build();
/// store.open(|_| Ok(())).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct StoreBuilder {
    path: PathBuf,
    capacity: usize,
    cacheable: BTreeSet<u8>,
}

impl From<PathBuf> for StoreBuilder {
    fn from(path: PathBuf) -> Self {
        StoreBuilder {
            path,
            capacity: DEFAULT_CACHE_CAPACITY,
            cacheable: BTreeSet::new(),
        }
    }
}

impl From<&Path> for StoreBuilder {
    fn from(path: &Path) -> Self {
        StoreBuilder::from(path.to_path_buf())
    }
}

impl From<&str> for StoreBuilder {
    fn from(path: &str) -> Self {
        StoreBuilder::from(PathBuf::from(path))
    }
}

impl StoreBuilder {
    /// Sets how many blocks the read cache holds before evicting.
    pub fn with_cache_capacity(mut self, blocks: usize) -> Self {
        self.capacity = blocks;
        self
    }

    /// Keeps blocks of payload kind `P` in the read cache. Worth it for
    /// structures that get traversed over and over, not for data read once.
    pub fn cacheable<P: BlockPayload>(mut self) -> Self {
        self.cacheable.insert(P::TAG);
        self
    }

    /// Builds the store. It still has to be opened before use.
    ///
    /// # Panics
    ///
    /// Panics if the cache capacity was set to zero.
    pub fn build(self) -> CachingBlockStore<FileBackedBlockStore> {
        CachingBlockStore::with_capacity(
            FileBackedBlockStore::new(&self.path),
            self.cacheable,
            self.capacity,
        )
    }
}
