use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use fsg_store::BlockStore;
use fsg_types::Cid;
use walkdir::WalkDir;

use crate::chunker::{DagConfig, FixedSizeChunker};
use crate::error::{DagError, DagResult};
use crate::node::{check_name, checked_total, DagNode, DirEntry, EntryKind, Link, Shard};

/// Builds Merkle DAGs from bytes, files and directory trees.
///
/// Every block produced is written to the store immediately. The builder
/// remembers which CIDs it wrote so the caller can announce them.
pub struct DagBuilder<'a> {
    store: &'a dyn BlockStore,
    config: DagConfig,
    chunker: FixedSizeChunker,
    written: Vec<Cid>,
    seen: HashSet<Cid>,
    content_bytes: u64,
}

impl<'a> DagBuilder<'a> {
    pub fn new(store: &'a dyn BlockStore, config: DagConfig) -> DagResult<Self> {
        config.validate()?;
        let chunker = FixedSizeChunker::new(config.chunk_size);
        Ok(Self {
            store,
            config,
            chunker,
            written: Vec::new(),
            seen: HashSet::new(),
            content_bytes: 0,
        })
    }

    /// Every distinct CID written so far, in write order.
    pub fn written(&self) -> &[Cid] {
        &self.written
    }

    /// File content bytes ingested so far.
    pub fn content_bytes(&self) -> u64 {
        self.content_bytes
    }

    /// Build a file DAG from an in-memory buffer.
    pub fn add_bytes(&mut self, data: &[u8]) -> DagResult<Cid> {
        let mut links = Vec::new();
        for chunk in self.chunker.chunks(data) {
            links.push(self.write_leaf(Bytes::copy_from_slice(chunk))?);
        }
        Ok(self.finish_file(links)?.cid)
    }

    /// Build a file DAG from a reader, one chunk in memory at a time.
    pub fn add_reader<R: Read>(&mut self, reader: R) -> DagResult<Cid> {
        Ok(self.file_link(reader, Path::new("<reader>"))?.cid)
    }

    pub fn add_file(&mut self, path: &Path) -> DagResult<Cid> {
        let file = File::open(path).map_err(|e| DagError::io(path, e))?;
        Ok(self.file_link(BufReader::new(file), path)?.cid)
    }

    /// Build a directory DAG from a tree on disk.
    ///
    /// Symlinks and special files are skipped.
    pub fn add_dir(&mut self, path: &Path) -> DagResult<Cid> {
        Ok(self.dir_entry_link(path)?.0)
    }

    /// Build a file or directory DAG, whichever `path` is.
    pub fn add_path(&mut self, path: &Path) -> DagResult<Cid> {
        let meta = std::fs::metadata(path).map_err(|e| DagError::io(path, e))?;
        if meta.is_dir() {
            self.add_dir(path)
        } else {
            self.add_file(path)
        }
    }

    /// Write a directory node over already-built children.
    ///
    /// Entries are sorted by name; duplicate or unsafe names are rejected.
    /// A listing that encodes larger than `max_dir_bytes` is split into
    /// shards of consecutive names.
    pub fn add_dir_entries(&mut self, mut entries: Vec<DirEntry>) -> DagResult<Cid> {
        for entry in &entries {
            check_name(&entry.name)?;
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(DagError::InvalidName(dup[0].name.clone()));
        }
        checked_total(entries.iter().map(|e| e.size)).ok_or(DagError::SizeOverflow)?;
        let budget = self.config.max_dir_bytes;
        let mut groups = split_by_budget(entries, usize::MAX, budget)?;
        if groups.len() == 1 {
            let entries = groups.pop().unwrap_or_default();
            return self.write_node(&DagNode::Directory { entries });
        }

        let mut shards = Vec::with_capacity(groups.len());
        for entries in groups {
            let first = entries[0].name.clone();
            let size = checked_total(entries.iter().map(|e| e.size)).ok_or(DagError::SizeOverflow)?;
            let cid = self.write_node(&DagNode::Directory { entries })?;
            shards.push(Shard { first, cid, size });
        }
        loop {
            let count = shards.len();
            let mut groups = split_by_budget(shards, self.config.max_links, budget)?;
            if groups.len() == count {
                // no two shards fit the budget together; group by fan-out alone
                let flat: Vec<Shard> = groups.into_iter().flatten().collect();
                groups = flat.chunks(self.config.max_links).map(<[Shard]>::to_vec).collect();
            }
            if groups.len() == 1 {
                let shards = groups.pop().unwrap_or_default();
                let cid = self.write_node(&DagNode::ShardedDirectory { shards })?;
                tracing::debug!(cid = %cid, "built sharded directory");
                return Ok(cid);
            }
            shards = Vec::with_capacity(groups.len());
            for group in groups {
                if group.len() == 1 {
                    shards.extend(group);
                    continue;
                }
                let first = group[0].first.clone();
                let size = checked_total(group.iter().map(|s| s.size)).ok_or(DagError::SizeOverflow)?;
                let cid = self.write_node(&DagNode::ShardedDirectory { shards: group })?;
                shards.push(Shard { first, cid, size });
            }
        }
    }

    /// Wrap an existing root in a one-entry directory so its name survives.
    pub fn wrap(&mut self, name: &str, root: Cid) -> DagResult<Cid> {
        let node = DagNode::decode(&self.store.get(&root)?)?;
        let entry = DirEntry::new(name, root, node.content_size(), node.kind());
        self.add_dir_entries(vec![entry])
    }

    fn file_link<R: Read>(&mut self, mut reader: R, path: &Path) -> DagResult<Link> {
        let mut links = Vec::new();
        loop {
            let chunk = self
                .chunker
                .next_chunk(&mut reader)
                .map_err(|e| DagError::io(path, e))?;
            if chunk.is_empty() {
                break;
            }
            links.push(self.write_leaf(Bytes::from(chunk))?);
        }
        self.finish_file(links)
    }

    fn dir_entry_link(&mut self, path: &Path) -> DagResult<(Cid, u64)> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for item in walker {
            let item = item.map_err(|e| DagError::io(path, e.into()))?;
            let name = item
                .file_name()
                .to_str()
                .ok_or_else(|| DagError::InvalidName(item.file_name().to_string_lossy().into_owned()))?
                .to_string();
            let file_type = item.file_type();
            if file_type.is_dir() {
                let (cid, size) = self.dir_entry_link(item.path())?;
                entries.push(DirEntry::new(name, cid, size, EntryKind::Directory));
            } else if file_type.is_file() {
                let file = File::open(item.path()).map_err(|e| DagError::io(item.path(), e))?;
                let link = self.file_link(BufReader::new(file), item.path())?;
                entries.push(DirEntry::new(name, link.cid, link.size, EntryKind::File));
            } else {
                tracing::warn!(path = %item.path().display(), "skipping non-regular file");
            }
        }
        let size = checked_total(entries.iter().map(|e| e.size)).ok_or(DagError::SizeOverflow)?;
        let cid = self.add_dir_entries(entries)?;
        tracing::debug!(path = %path.display(), cid = %cid, size, "built directory");
        Ok((cid, size))
    }

    fn write_leaf(&mut self, chunk: Bytes) -> DagResult<Link> {
        let size = chunk.len() as u64;
        self.content_bytes += size;
        let cid = self.write_node(&DagNode::Leaf(chunk))?;
        Ok(Link { cid, size })
    }

    /// Stack internal nodes over `links` until a single root remains.
    fn finish_file(&mut self, mut links: Vec<Link>) -> DagResult<Link> {
        if links.is_empty() {
            links.push(self.write_leaf(Bytes::new())?);
        }
        while links.len() > 1 {
            let mut parents = Vec::with_capacity(links.len().div_ceil(self.config.max_links));
            for group in links.chunks(self.config.max_links) {
                if let [only] = group {
                    parents.push(*only);
                    continue;
                }
                let total_size =
                    checked_total(group.iter().map(|l| l.size)).ok_or(DagError::SizeOverflow)?;
                let cid = self.write_node(&DagNode::File {
                    total_size,
                    links: group.to_vec(),
                })?;
                parents.push(Link {
                    cid,
                    size: total_size,
                });
            }
            links = parents;
        }
        Ok(links[0])
    }

    fn write_node(&mut self, node: &DagNode) -> DagResult<Cid> {
        let block = node.to_block()?;
        self.store.put(&block)?;
        let cid = *block.cid();
        if self.seen.insert(cid) {
            self.written.push(cid);
        }
        Ok(cid)
    }
}

/// Tag byte plus the bincode length prefix of the item list.
const NODE_OVERHEAD: usize = 1 + 8;

/// Split `items` into consecutive groups of at most `max_items` whose
/// encoded size stays within `budget`. An item larger than the budget gets
/// a group of its own. Always yields at least one group.
fn split_by_budget<T: serde::Serialize>(
    items: Vec<T>,
    max_items: usize,
    budget: usize,
) -> DagResult<Vec<Vec<T>>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut bytes = NODE_OVERHEAD;
    for item in items {
        let cost = bincode::serialized_size(&item).map_err(|e| DagError::Encode(e.to_string()))?;
        let cost = usize::try_from(cost).unwrap_or(usize::MAX);
        if !current.is_empty() && (current.len() >= max_items || bytes.saturating_add(cost) > budget) {
            groups.push(std::mem::take(&mut current));
            bytes = NODE_OVERHEAD;
        }
        bytes = bytes.saturating_add(cost);
        current.push(item);
    }
    groups.push(current);
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use fsg_store::InMemoryBlockStore;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::reader::DagReader;

    fn small_config() -> DagConfig {
        DagConfig {
            chunk_size: 8,
            max_links: 3,
            ..DagConfig::default()
        }
    }

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        data
    }

    #[test]
    fn small_input_is_single_leaf() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let root = builder.add_bytes(b"hello").unwrap();

        let node = DagNode::decode(&store.get(&root).unwrap()).unwrap();
        assert_eq!(node, DagNode::Leaf(Bytes::from_static(b"hello")));
        assert_eq!(builder.written(), &[root]);
    }

    #[test]
    fn empty_input_is_empty_leaf() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let root = builder.add_bytes(b"").unwrap();
        assert_eq!(DagReader::new(&store).read_file(&root).unwrap(), b"");
    }

    #[test]
    fn one_mebibyte_publish_stores_every_leaf() {
        let store = InMemoryBlockStore::new();
        let data = random_bytes(1024 * 1024, 7);
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let root = builder.add_bytes(&data).unwrap();

        let root_block = store.get(&root).unwrap();
        let node = DagNode::decode(&root_block).unwrap();
        let children = node.links();
        assert_eq!(children.len(), 4);
        for child in &children {
            assert!(store.has(child).unwrap());
        }
        assert_eq!(node.content_size(), data.len() as u64);
        assert_eq!(builder.content_bytes(), data.len() as u64);
    }

    #[test]
    fn deep_tree_when_fanout_exceeded() {
        let store = InMemoryBlockStore::new();
        let data = random_bytes(8 * 20, 1);
        let mut builder = DagBuilder::new(&store, small_config()).unwrap();
        let root = builder.add_bytes(&data).unwrap();

        // 20 leaves at fan-out 3 need three internal levels.
        let reader = DagReader::new(&store);
        let mut depth = 0;
        let mut cursor = root;
        while let DagNode::File { links, .. } = reader.node(&cursor).unwrap() {
            assert!(links.len() <= 3);
            cursor = links[0].cid;
            depth += 1;
        }
        assert_eq!(depth, 3);
        assert_eq!(reader.read_file(&root).unwrap(), data);
    }

    #[test]
    fn reader_and_buffer_paths_agree() {
        let data = random_bytes(1000, 3);
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, small_config()).unwrap();
        let from_bytes = builder.add_bytes(&data).unwrap();
        let from_reader = builder.add_reader(&data[..]).unwrap();
        assert_eq!(from_bytes, from_reader);
    }

    #[test]
    fn repeated_chunks_are_written_once() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, small_config()).unwrap();
        builder.add_bytes(&[0u8; 8 * 2]).unwrap();
        // one shared leaf plus one file node
        assert_eq!(builder.written().len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn directory_lists_sorted_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();

        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let root = builder.add_path(dir.path()).unwrap();

        let reader = DagReader::new(&store);
        let entries = reader.list(&root).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(reader.read_file(&entries[0].cid).unwrap(), b"alpha");
        assert_eq!(reader.read_file(&entries[1].cid).unwrap(), b"bravo");
    }

    #[test]
    fn nested_directories_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        std::fs::write(dir.path().join("sub/deeper/x.bin"), random_bytes(100, 9)).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"top").unwrap();

        let first = InMemoryBlockStore::new();
        let second = InMemoryBlockStore::new();
        let a = DagBuilder::new(&first, small_config()).unwrap().add_dir(dir.path()).unwrap();
        let b = DagBuilder::new(&second, small_config()).unwrap().add_dir(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(first.all_cids(), second.all_cids());
    }

    #[test]
    fn duplicate_entry_names_are_rejected() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let cid = builder.add_bytes(b"x").unwrap();
        let entries = vec![
            DirEntry::new("same", cid, 1, EntryKind::File),
            DirEntry::new("same", cid, 1, EntryKind::File),
        ];
        assert!(matches!(
            builder.add_dir_entries(entries),
            Err(DagError::InvalidName(_))
        ));
    }

    #[test]
    fn wrap_preserves_name_and_size() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let file = builder.add_bytes(b"payload").unwrap();
        let wrapped = builder.wrap("notes.txt", file).unwrap();

        let entries = DagReader::new(&store).list(&wrapped).unwrap();
        assert_eq!(entries, vec![DirEntry::new("notes.txt", file, 7, EntryKind::File)]);
    }

    #[test]
    fn large_directory_is_sharded_and_lists_back() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let file = builder.add_bytes(b"x").unwrap();
        let count = 20_001;
        let entries: Vec<DirEntry> = (0..count)
            .rev()
            .map(|i| DirEntry::new(format!("file-{i:06}.txt"), file, 1, EntryKind::File))
            .collect();
        let root = builder.add_dir_entries(entries).unwrap();

        let reader = DagReader::new(&store);
        let node = reader.node(&root).unwrap();
        assert!(matches!(node, DagNode::ShardedDirectory { .. }));
        assert_eq!(node.kind(), EntryKind::Directory);
        assert_eq!(node.content_size(), count as u64);
        for cid in builder.written() {
            let block = store.get(cid).unwrap();
            assert!(block.data().len() <= DagConfig::default().max_dir_bytes);
        }

        let listed = reader.list(&root).unwrap();
        assert_eq!(listed.len(), count);
        assert!(listed.windows(2).all(|w| w[0].name < w[1].name));
        assert_eq!(listed[0].name, "file-000000.txt");
        assert_eq!(listed[count - 1].name, "file-020000.txt");
        assert_eq!(reader.concat(&root).unwrap(), vec![b'x'; count]);
    }

    #[test]
    fn long_names_still_converge_to_one_root() {
        let store = InMemoryBlockStore::new();
        let config = DagConfig {
            max_dir_bytes: 256,
            ..small_config()
        };
        let mut builder = DagBuilder::new(&store, config).unwrap();
        let file = builder.add_bytes(b"x").unwrap();
        let entries: Vec<DirEntry> = (0..10)
            .map(|i| DirEntry::new(format!("{i}{}", "n".repeat(250)), file, 1, EntryKind::File))
            .collect();
        let root = builder.add_dir_entries(entries.clone()).unwrap();
        assert_eq!(DagReader::new(&store).list(&root).unwrap(), entries);
    }

    #[test]
    fn small_directory_stays_flat() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let file = builder.add_bytes(b"x").unwrap();
        let root = builder
            .add_dir_entries(vec![DirEntry::new("only", file, 1, EntryKind::File)])
            .unwrap();
        assert!(matches!(
            DagReader::new(&store).node(&root).unwrap(),
            DagNode::Directory { .. }
        ));
    }

    #[test]
    fn overflowing_entry_sizes_are_rejected() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, small_config()).unwrap();
        let file = builder.add_bytes(b"x").unwrap();
        let flat = vec![
            DirEntry::new("a", file, u64::MAX, EntryKind::File),
            DirEntry::new("b", file, 6, EntryKind::File),
        ];
        assert!(matches!(builder.add_dir_entries(flat), Err(DagError::SizeOverflow)));

        let mut tight = DagBuilder::new(
            &store,
            DagConfig {
                max_dir_bytes: 256,
                ..small_config()
            },
        )
        .unwrap();
        let sharded: Vec<DirEntry> = (0..20)
            .map(|i| DirEntry::new(format!("n{i:02}"), file, u64::MAX / 4, EntryKind::File))
            .collect();
        assert!(matches!(tight.add_dir_entries(sharded), Err(DagError::SizeOverflow)));
    }

    #[test]
    fn missing_input_is_io_error() {
        let store = InMemoryBlockStore::new();
        let mut builder = DagBuilder::new(&store, DagConfig::default()).unwrap();
        let err = builder.add_path(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, DagError::Io { .. }));
    }

    proptest::proptest! {
        #[test]
        fn same_bytes_same_root(data in proptest::collection::vec(proptest::num::u8::ANY, 0..300)) {
            let first = InMemoryBlockStore::new();
            let second = InMemoryBlockStore::new();
            let a = DagBuilder::new(&first, small_config()).unwrap().add_bytes(&data).unwrap();
            let b = DagBuilder::new(&second, small_config()).unwrap().add_bytes(&data).unwrap();
            proptest::prop_assert_eq!(a, b);
        }

        #[test]
        fn build_then_read_roundtrips(data in proptest::collection::vec(proptest::num::u8::ANY, 0..300)) {
            let store = InMemoryBlockStore::new();
            let root = DagBuilder::new(&store, small_config()).unwrap().add_bytes(&data).unwrap();
            proptest::prop_assert_eq!(DagReader::new(&store).read_file(&root).unwrap(), data);
        }
    }
}
