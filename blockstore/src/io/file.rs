use crate::alloc::AppendAllocator;
use crate::block::{Block, BlockPayload, BlockPointer, NewBlock};
use crate::error::{Error, Result};
use crate::io::BlockStore;
use crate::record::{self, RecordHeader, RecordTail, HEADER_SIZE, MAX_PAYLOAD_SIZE, TAIL_SIZE};
use log::{debug, trace, warn};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

/// Stores blocks as framed records in a single append-only file.
///
/// Every `write` goes straight to the file handle; there is no buffering at
/// this layer. Records are validated on the way back in and any mismatch is
/// reported as corruption.
pub struct FileBackedBlockStore {
    path: PathBuf,
    /// Present between `open` and `close`.
    fd: Option<File>,
    /// Length of the file as far as this store knows. Only grows, except on clear.
    file_size: u64,
    alloc: AppendAllocator,
}

impl FileBackedBlockStore {
    /// Creates a store for the file at `path`. Nothing is touched until `open`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fd: None,
            file_size: 0,
            alloc: AppendAllocator::starting_at(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Current length of the backing file.
    pub fn len(&self) -> u64 {
        self.file_size
    }

    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    /// Where the next attached block will be placed.
    pub fn next_pointer(&self) -> BlockPointer {
        self.alloc.next()
    }

    /// Forces written records to stable storage. `flush` does not do this.
    pub fn sync(&mut self) -> Result<()> {
        self.file()?.sync_all()?;
        Ok(())
    }

    /// Throws away a store found to be corrupt and runs `init` again, leaving
    /// it in the state of a freshly created one.
    pub fn rebuild<F>(&mut self, init: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        warn!("{} is corrupt. Discarding.", self);
        self.clear()?;
        init(self)
    }

    fn file(&mut self) -> Result<&mut File> {
        self.fd.as_mut().ok_or(Error::NotOpen)
    }

    fn corrupted(&self, pointer: BlockPointer, reason: &str) -> Error {
        warn!("corrupted block {} found in {}: {}", pointer, self, reason);
        Error::Corrupted {
            store: self.to_string(),
            pointer,
            reason: reason.to_string(),
        }
    }

    /// Fills `buf` from the current position. Running out of file is corruption.
    fn read_record_bytes(&mut self, pointer: BlockPointer, buf: &mut [u8]) -> Result<()> {
        let outcome = self.file()?.read_exact(buf);
        match outcome {
            Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(self.corrupted(pointer, "record is truncated"))
            }
            other => Ok(other?),
        }
    }
}

impl BlockStore for FileBackedBlockStore {
    fn open<F>(&mut self, init: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        let len = file.metadata()?.len();

        self.fd = Some(file);
        self.file_size = len;
        self.alloc = AppendAllocator::starting_at(len);
        debug!("opened {} ({} bytes)", self, len);

        if len == 0 {
            init(self)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.fd.take().is_some() {
            debug!("closed {}", self);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.file()?.set_len(0)?;
        self.file_size = 0;
        self.alloc.reset();
        debug!("cleared {}", self);
        Ok(())
    }

    fn attach<P: BlockPayload>(&mut self, block: NewBlock<P>) -> Result<Block<P>> {
        if self.fd.is_none() {
            return Err(Error::NotOpen);
        }
        let len = record::record_len(block.size());
        let pointer = self.alloc.allocate(len);
        trace!("allocated {} bytes at {} in {}", len, pointer, self);
        Ok(block.place(pointer))
    }

    fn write<P: BlockPayload>(&mut self, block: &Block<P>) -> Result<()> {
        let pointer = block.pointer();
        let pos = pointer.offset().ok_or(Error::NullPointer)?;

        let reserved = block.size();
        let mut body = Vec::with_capacity(reserved);
        block.payload().write_to(&mut body)?;
        if body.len() > reserved || body.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadOverflow {
                pointer,
                reserved,
                actual: body.len(),
            });
        }

        let bytes = record::encode(P::TAG, &body);
        let end = pos + bytes.len() as u64;
        let file_size = self.file_size;
        let file = self.file()?;
        if end > file_size {
            file.set_len(end)?;
        }
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(&bytes)?;

        if end > self.file_size {
            self.file_size = end;
        }
        self.alloc.reserve_until(end);
        trace!("wrote {} payload bytes of type {:#04x} at {}", body.len(), P::TAG, pointer);
        Ok(())
    }

    fn read<P: BlockPayload>(&mut self, pointer: BlockPointer) -> Result<Block<P>> {
        let pos = pointer.offset().ok_or(Error::NullPointer)?;
        if self.fd.is_none() {
            return Err(Error::NotOpen);
        }
        if pos + HEADER_SIZE as u64 > self.file_size {
            return Err(self.corrupted(pointer, "record starts beyond the end of the file"));
        }

        self.file()?.seek(SeekFrom::Start(pos))?;
        let mut header = [0; HEADER_SIZE];
        self.read_record_bytes(pointer, &mut header)?;
        let header = match RecordHeader::parse(&header) {
            Some(header) => header,
            None => return Err(self.corrupted(pointer, "unreadable record header")),
        };
        if !header.has_marker() {
            return Err(self.corrupted(pointer, "missing record marker"));
        }
        if header.tag() != P::TAG {
            return Err(self.corrupted(pointer, "unexpected payload type"));
        }
        let len = header.len() as usize;
        if pos + record::record_len(len) > self.file_size {
            return Err(self.corrupted(pointer, "record runs past the end of the file"));
        }

        let mut body = vec![0; len];
        self.read_record_bytes(pointer, &mut body)?;
        let mut tail = [0; TAIL_SIZE];
        self.read_record_bytes(pointer, &mut tail)?;

        let mut source = &body[..];
        let payload = match P::read_from(&mut source) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(self.corrupted(pointer, &format!("payload failed to decode: {}", e)))
            }
        };
        let consumed = len - source.len();
        if consumed != len {
            return Err(self.corrupted(pointer, "payload is shorter than its declared length"));
        }
        let count = RecordTail::parse(&tail).map(|tail| tail.count());
        if count != Some(consumed as u64) {
            return Err(self.corrupted(pointer, "trailing count does not match the payload"));
        }

        trace!("read {} payload bytes of type {:#04x} at {}", len, P::TAG, pointer);
        Ok(Block::with_size(pointer, payload, len))
    }

    fn read_first<P: BlockPayload>(&mut self) -> Result<Block<P>> {
        self.read(BlockPointer::at(0))
    }

    fn remove<P: BlockPayload>(&mut self, block: Block<P>) -> Result<()> {
        if block.pointer().is_null() {
            return Err(Error::NullPointer);
        }
        trace!("retired {} in {}", block.pointer(), self);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Display for FileBackedBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache '{}'", self.path.display())
    }
}

impl fmt::Debug for FileBackedBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackedBlockStore")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("file_size", &self.file_size)
            .field("next", &self.alloc.next())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{BytesPayload, RootPayload};
    use tempfile::NamedTempFile;

    fn open_store(disk: &NamedTempFile) -> FileBackedBlockStore {
        let mut store = FileBackedBlockStore::new(disk.path());
        store.open(|_| Ok(())).unwrap();
        store
    }

    fn write_new<P: BlockPayload>(store: &mut FileBackedBlockStore, payload: P) -> Block<P> {
        let block = store.attach(NewBlock::new(payload)).unwrap();
        store.write(&block).unwrap();
        block
    }

    fn overwrite_byte(disk: &NamedTempFile, pos: u64, value: u8) {
        let mut file = disk.reopen().unwrap();
        file.seek(SeekFrom::Start(pos)).unwrap();
        file.write_all(&[value]).unwrap();
    }

    #[test]
    fn init_runs_only_for_empty_files() {
        let disk = NamedTempFile::new().unwrap();
        let mut runs = 0;

        let mut store = FileBackedBlockStore::new(disk.path());
        store
            .open(|store| {
                runs += 1;
                write_new(store, RootPayload::default());
                Ok(())
            })
            .unwrap();
        store.close().unwrap();

        let mut store = FileBackedBlockStore::new(disk.path());
        store
            .open(|_| {
                runs += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(runs, 1);
        assert_eq!(store.len(), 22);
        assert_eq!(store.next_pointer(), BlockPointer::at(22));
    }

    #[test]
    fn writes_exact_record_layout() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        write_new(&mut store, BytesPayload::new(vec![0xAB]));

        let bytes = std::fs::read(disk.path()).unwrap();
        assert_eq!(
            bytes,
            vec![0xCC, 0x33, 0, 0, 0, 5, 0, 0, 0, 1, 0xAB, 0, 0, 0, 0, 0, 0, 0, 5]
        );
    }

    #[test]
    fn can_write_and_read_blocks() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let first = write_new(&mut store, BytesPayload::new(b"first".to_vec()));
        let second = write_new(&mut store, BytesPayload::new(b"second".to_vec()));

        let read: Block<BytesPayload> = store.read(second.pointer()).unwrap();
        assert_eq!(read.payload().bytes(), b"second");
        let read: Block<BytesPayload> = store.read(first.pointer()).unwrap();
        assert_eq!(read.payload().bytes(), b"first");
        assert_eq!(read.size(), first.size());
    }

    #[test]
    fn read_first_reads_offset_zero() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = FileBackedBlockStore::new(disk.path());
        store
            .open(|store| {
                write_new(store, RootPayload::new(BlockPointer::at(22)));
                Ok(())
            })
            .unwrap();

        let root: Block<RootPayload> = store.read_first().unwrap();
        assert_eq!(root.payload().root, BlockPointer::at(22));
    }

    #[test]
    fn writing_past_the_end_grows_the_file() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = Block::with_size(BlockPointer::at(100), BytesPayload::new(vec![1, 2]), 6);
        store.write(&block).unwrap();

        assert_eq!(store.len(), 100 + 20);
        assert_eq!(disk.as_file().metadata().unwrap().len(), 120);
        assert_eq!(store.next_pointer(), BlockPointer::at(120));
    }

    #[test]
    fn attach_never_hands_out_space_already_written() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = FileBackedBlockStore::new(disk.path());
        store
            .open(|store| {
                let root = Block::with_size(BlockPointer::at(0), RootPayload::default(), 8);
                store.write(&root)
            })
            .unwrap();

        let block = store.attach(NewBlock::new(BytesPayload::new(vec![5; 8]))).unwrap();
        assert_eq!(block.pointer(), BlockPointer::at(22));
        store.write(&block).unwrap();

        let root: Block<RootPayload> = store.read_first().unwrap();
        assert!(root.payload().root.is_null());
        let read: Block<BytesPayload> = store.read(block.pointer()).unwrap();
        assert_eq!(read.payload().bytes(), &[5; 8]);
    }

    #[test]
    fn rewriting_a_shrunk_payload_keeps_the_file_length() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let mut block = write_new(&mut store, BytesPayload::new(vec![7; 10]));
        block.payload_mut().bytes_mut().truncate(3);
        store.write(&block).unwrap();

        assert_eq!(store.len(), 28);
        let read: Block<BytesPayload> = store.read(block.pointer()).unwrap();
        assert_eq!(read.payload().bytes(), &[7, 7, 7]);
    }

    #[test]
    fn growing_a_payload_is_rejected() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let mut block = write_new(&mut store, BytesPayload::new(vec![1, 2]));
        block.payload_mut().bytes_mut().push(3);

        match store.write(&block).unwrap_err() {
            Error::PayloadOverflow {
                reserved, actual, ..
            } => {
                assert_eq!(reserved, 6);
                assert_eq!(actual, 7);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn blocks_read_back_cannot_grow_into_their_neighbour() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let first = write_new(&mut store, BytesPayload::new(vec![1, 2]));
        let second = write_new(&mut store, BytesPayload::new(vec![3, 4]));
        assert_eq!(second.pointer(), BlockPointer::at(20));

        let mut read: Block<BytesPayload> = store.read(first.pointer()).unwrap();
        assert_eq!(read.size(), 6);
        read.payload_mut().bytes_mut().extend_from_slice(&[9; 16]);

        match store.write(&read).unwrap_err() {
            Error::PayloadOverflow { reserved, actual, .. } => {
                assert_eq!(reserved, 6);
                assert_eq!(actual, 22);
            }
            other => panic!("unexpected error: {}", other),
        }
        let neighbour: Block<BytesPayload> = store.read(second.pointer()).unwrap();
        assert_eq!(neighbour.payload().bytes(), &[3, 4]);
    }

    #[test]
    fn flipped_marker_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = write_new(&mut store, BytesPayload::new(vec![1]));
        overwrite_byte(&disk, 0, 0x00);

        let err = store.read::<BytesPayload>(block.pointer()).unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {}", err);
    }

    #[test]
    fn flipped_type_tag_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = write_new(&mut store, BytesPayload::new(vec![1]));
        overwrite_byte(&disk, 1, RootPayload::TAG);

        assert!(store.read::<BytesPayload>(block.pointer()).unwrap_err().is_corruption());
    }

    #[test]
    fn requesting_the_wrong_type_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = write_new(&mut store, BytesPayload::new(vec![0; 4]));

        assert!(store.read::<RootPayload>(block.pointer()).unwrap_err().is_corruption());
    }

    #[test]
    fn flipped_trailing_count_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = write_new(&mut store, BytesPayload::new(vec![1, 2, 3]));
        // Last byte of the 8 byte count.
        overwrite_byte(&disk, store.len() - 1, 0x42);

        assert!(store.read::<BytesPayload>(block.pointer()).unwrap_err().is_corruption());
    }

    #[test]
    fn oversized_length_field_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = write_new(&mut store, BytesPayload::new(vec![1, 2, 3]));
        overwrite_byte(&disk, 2, 0x10);

        assert!(store.read::<BytesPayload>(block.pointer()).unwrap_err().is_corruption());
    }

    #[test]
    fn truncated_file_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        write_new(&mut store, BytesPayload::new(vec![1, 2, 3]));
        let block = write_new(&mut store, BytesPayload::new(vec![4, 5, 6]));
        store.close().unwrap();

        let pos = block.pointer().offset().unwrap();
        disk.as_file().set_len(pos + 10).unwrap();

        let mut store = open_store(&disk);
        assert!(store.read::<BytesPayload>(block.pointer()).unwrap_err().is_corruption());
    }

    #[test]
    fn reading_past_the_end_is_corruption() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        assert!(store
            .read::<BytesPayload>(BlockPointer::at(0))
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn null_pointer_reads_are_rejected() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        match store.read::<RootPayload>(BlockPointer::NULL) {
            Err(Error::NullPointer) => (),
            other => panic!("expected a null pointer error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn clear_truncates_and_restarts_allocation() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        write_new(&mut store, BytesPayload::new(vec![1; 40]));
        store.clear().unwrap();

        assert_eq!(store.len(), 0);
        assert_eq!(disk.as_file().metadata().unwrap().len(), 0);
        let block = store.attach(NewBlock::new(RootPayload::default())).unwrap();
        assert_eq!(block.pointer(), BlockPointer::at(0));
    }

    #[test]
    fn rebuild_discards_and_reinitializes() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        write_new(&mut store, BytesPayload::new(vec![9; 64]));
        overwrite_byte(&disk, 0, 0x00);
        assert!(store.read_first::<BytesPayload>().unwrap_err().is_corruption());

        store
            .rebuild(|store| {
                write_new(store, RootPayload::default());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.len(), 22);
        let root: Block<RootPayload> = store.read_first().unwrap();
        assert!(root.payload().root.is_null());
    }

    #[test]
    fn removed_blocks_keep_their_space() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        let block = write_new(&mut store, BytesPayload::new(vec![1, 2]));
        let pointer = block.pointer();
        store.remove(block).unwrap();

        let next = store.attach(NewBlock::new(BytesPayload::new(vec![1, 2]))).unwrap();
        assert!(next.pointer() > pointer);
        assert_eq!(store.len(), 20);
    }

    #[test]
    fn closed_store_refuses_io() {
        let disk = NamedTempFile::new().unwrap();
        let mut store = open_store(&disk);
        store.close().unwrap();

        assert!(!store.is_open());
        match store.attach(NewBlock::new(RootPayload::default())) {
            Err(Error::NotOpen) => (),
            _ => panic!("expected the store to be closed"),
        }
        match store.read_first::<RootPayload>() {
            Err(Error::NotOpen) => (),
            _ => panic!("expected the store to be closed"),
        }
    }
}
