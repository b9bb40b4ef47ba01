use crate::block::{Block, BlockPayload, BlockPointer, NewBlock};
use crate::error::{Error, Result};
use crate::io::BlockStore;
use hashlink::{LinkedHashMap, LruCache};
use log::{debug, trace};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;

/// Read cache capacity used when none is configured.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Counters describing how reads were served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from blocks written but not yet flushed.
    pub dirty_hits: u64,
    /// Reads answered from the read cache.
    pub cache_hits: u64,
    /// Reads that went to the wrapped store.
    pub misses: u64,
    /// Entries pushed out of the read cache to make room.
    pub evictions: u64,
    pub dirty_len: usize,
    pub cached_len: usize,
}

/// A block waiting to be written, together with the write routine for its
/// payload kind.
struct Pending<S> {
    block: Box<dyn Any>,
    write: fn(&mut S, &dyn Any) -> Result<()>,
}

impl<S: BlockStore> Pending<S> {
    fn new<P: BlockPayload>(block: Block<P>) -> Self {
        Self {
            block: Box::new(block),
            write: write_pending::<S, P>,
        }
    }
}

fn write_pending<S: BlockStore, P: BlockPayload>(store: &mut S, block: &dyn Any) -> Result<()> {
    match block.downcast_ref::<Block<P>>() {
        Some(block) => store.write(block),
        None => unreachable!("pending write does not hold a Block<{}>", std::any::type_name::<P>()),
    }
}

/// Write-back and read caching in front of another block store.
///
/// Writes are held in memory until `flush` or `close`. Reads look at the held
/// writes first, then at a bounded LRU cache that only keeps the payload kinds
/// named at construction, and only then ask the wrapped store.
pub struct CachingBlockStore<S> {
    inner: S,
    cacheable: HashSet<u8>,
    /// Unflushed writes in the order they were made.
    dirty: LinkedHashMap<BlockPointer, Pending<S>>,
    cache: LruCache<BlockPointer, Box<dyn Any>>,
    stats: CacheStats,
}

impl<S: BlockStore> CachingBlockStore<S> {
    /// Wraps `inner`, caching reads of the payload kinds whose tags are listed.
    pub fn new<I>(inner: S, cacheable: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        Self::with_capacity(inner, cacheable, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity<I>(inner: S, cacheable: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        assert!(capacity > 0, "read cache capacity must be at least one block");
        Self {
            inner,
            cacheable: cacheable.into_iter().collect(),
            dirty: LinkedHashMap::new(),
            cache: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            dirty_len: self.dirty.len(),
            cached_len: self.cache.len(),
            ..self.stats
        }
    }

    pub fn is_cacheable<P: BlockPayload>(&self) -> bool {
        self.cacheable.contains(&P::TAG)
    }

    fn cache_insert<P: BlockPayload>(&mut self, block: &Block<P>) {
        let pointer = block.pointer();
        if self.cache.len() >= self.cache.capacity() && !self.cache.contains_key(&pointer) {
            self.stats.evictions += 1;
        }
        self.cache.insert(pointer, Box::new(block.clone()));
    }

    fn type_mismatch<P: BlockPayload>(&self, pointer: BlockPointer) -> Error {
        Error::Corrupted {
            store: self.inner.to_string(),
            pointer,
            reason: format!(
                "block is not a {} payload",
                std::any::type_name::<P>()
            ),
        }
    }

    /// Serves a read from memory if possible.
    fn lookup<P: BlockPayload>(&mut self, pointer: BlockPointer) -> Option<Option<Block<P>>> {
        if let Some(pending) = self.dirty.get(&pointer) {
            self.stats.dirty_hits += 1;
            return Some(pending.block.downcast_ref::<Block<P>>().cloned());
        }
        if self.is_cacheable::<P>() {
            if let Some(cached) = self.cache.get(&pointer) {
                self.stats.cache_hits += 1;
                return Some(cached.downcast_ref::<Block<P>>().cloned());
            }
        }
        None
    }
}

impl<S: BlockStore> BlockStore for CachingBlockStore<S> {
    fn open<F>(&mut self, init: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.dirty.clear();
        self.cache.clear();

        let mut fresh = false;
        self.inner.open(|_| {
            fresh = true;
            Ok(())
        })?;
        if fresh {
            init(self)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.cache.clear();
        self.inner.close()
    }

    fn clear(&mut self) -> Result<()> {
        self.dirty.clear();
        self.cache.clear();
        self.inner.clear()
    }

    fn attach<P: BlockPayload>(&mut self, block: NewBlock<P>) -> Result<Block<P>> {
        self.inner.attach(block)
    }

    fn write<P: BlockPayload>(&mut self, block: &Block<P>) -> Result<()> {
        let pointer = block.pointer();
        if pointer.is_null() {
            return Err(Error::NullPointer);
        }
        let actual = block.payload().size();
        if actual > block.size() {
            return Err(Error::PayloadOverflow {
                pointer,
                reserved: block.size(),
                actual,
            });
        }
        self.dirty.insert(pointer, Pending::new(block.clone()));
        if self.is_cacheable::<P>() {
            self.cache_insert(block);
        } else {
            // The pointer may have held a cacheable kind before.
            self.cache.remove(&pointer);
        }
        trace!("buffered write of {} for {}", pointer, self.inner);
        Ok(())
    }

    fn read<P: BlockPayload>(&mut self, pointer: BlockPointer) -> Result<Block<P>> {
        if pointer.is_null() {
            return Err(Error::NullPointer);
        }
        match self.lookup::<P>(pointer) {
            Some(Some(block)) => return Ok(block),
            Some(None) => return Err(self.type_mismatch::<P>(pointer)),
            None => (),
        }

        self.stats.misses += 1;
        let block = self.inner.read::<P>(pointer)?;
        if self.is_cacheable::<P>() {
            self.cache_insert(&block);
        }
        Ok(block)
    }

    fn read_first<P: BlockPayload>(&mut self) -> Result<Block<P>> {
        let first = BlockPointer::at(0);
        if let Some(pending) = self.dirty.get(&first) {
            self.stats.dirty_hits += 1;
            return match pending.block.downcast_ref::<Block<P>>() {
                Some(block) => Ok(block.clone()),
                None => Err(self.type_mismatch::<P>(first)),
            };
        }

        self.stats.misses += 1;
        let block = self.inner.read_first::<P>()?;
        if self.is_cacheable::<P>() {
            self.cache_insert(&block);
        }
        Ok(block)
    }

    fn remove<P: BlockPayload>(&mut self, block: Block<P>) -> Result<()> {
        let pointer = block.pointer();
        self.dirty.remove(&pointer);
        if self.is_cacheable::<P>() {
            self.cache.remove(&pointer);
        }
        self.inner.remove(block)
    }

    fn flush(&mut self) -> Result<()> {
        let count = self.dirty.len();
        // A block leaves the buffer only once the wrapped store accepted it.
        while let Some((_, pending)) = self.dirty.front() {
            (pending.write)(&mut self.inner, &*pending.block)?;
            self.dirty.pop_front();
        }
        self.inner.flush()?;
        if count > 0 {
            debug!("flushed {} blocks to {}", count, self.inner);
        }
        Ok(())
    }
}

impl<S: BlockStore> fmt::Display for CachingBlockStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}
