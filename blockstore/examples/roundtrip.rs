use blockstore::{Block, BlockStore, BytesPayload, NewBlock, RootPayload, StoreBuilder};

pub fn main() -> blockstore::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cache.bin");

    // Create a store with a root record and hang one data block off it.
    let mut store = StoreBuilder::from(path.as_path())
        .cacheable::<RootPayload>()
        .build();
    store.open(|store| {
        let root = store.attach(NewBlock::new(RootPayload::default()))?;
        store.write(&root)
    })?;

    let data = store.attach(NewBlock::new(BytesPayload::new(b"hello".to_vec())))?;
    store.write(&data)?;
    let mut root: Block<RootPayload> = store.read_first()?;
    root.payload_mut().root = data.pointer();
    store.write(&root)?;
    store.close()?;

    // Reopen and follow the root pointer.
    let mut store = StoreBuilder::from(path.as_path()).build();
    store.open(|_| Ok(()))?;
    let root: Block<RootPayload> = store.read_first()?;
    let data: Block<BytesPayload> = store.read(root.payload().root)?;
    println!(
        "{} bytes on disk, root -> {}, data = {:?}",
        store.inner().len(),
        root.payload().root,
        String::from_utf8_lossy(data.payload().bytes())
    );
    store.close()
}
