use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fsg_store::BlockStore;
use fsg_types::Cid;

use crate::error::{DagError, DagResult};
use crate::node::{check_name, DagNode, DirEntry, EntryKind};

/// Walks DAGs held in a block store.
pub struct DagReader<'a> {
    store: &'a dyn BlockStore,
}

impl<'a> DagReader<'a> {
    pub fn new(store: &'a dyn BlockStore) -> Self {
        Self { store }
    }

    /// Load and decode one node.
    pub fn node(&self, cid: &Cid) -> DagResult<DagNode> {
        DagNode::decode(&self.store.get(cid)?)
    }

    /// Reassemble the bytes of a file DAG.
    pub fn read_file(&self, cid: &Cid) -> DagResult<Vec<u8>> {
        let mut out = Vec::new();
        self.emit_file(cid, &mut out, Path::new("<memory>"))?;
        Ok(out)
    }

    /// Concatenate every file under `cid`, depth first in name order.
    ///
    /// For a file root this is the same as [`read_file`](Self::read_file).
    pub fn concat(&self, cid: &Cid) -> DagResult<Vec<u8>> {
        let mut out = Vec::new();
        self.concat_into(cid, &mut out)?;
        Ok(out)
    }

    fn concat_into(&self, cid: &Cid, out: &mut Vec<u8>) -> DagResult<()> {
        let node = self.node(cid)?;
        if node.kind() == EntryKind::File {
            return self.emit_file(cid, out, Path::new("<memory>")).map(drop);
        }
        let mut entries = self.entries(cid, node)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            self.concat_into(&entry.cid, out)?;
        }
        Ok(())
    }

    /// Entries of a directory root, or one unnamed entry for a file root.
    ///
    /// Shards of a sharded directory are loaded and flattened in name order.
    pub fn list(&self, cid: &Cid) -> DagResult<Vec<DirEntry>> {
        let node = self.node(cid)?;
        match node.kind() {
            EntryKind::Directory => self.entries(cid, node),
            EntryKind::File => Ok(vec![DirEntry::new("", *cid, node.content_size(), EntryKind::File)]),
        }
    }

    fn entries(&self, cid: &Cid, node: DagNode) -> DagResult<Vec<DirEntry>> {
        let mut out = Vec::new();
        self.collect_entries(cid, node, &mut out)?;
        Ok(out)
    }

    fn collect_entries(&self, cid: &Cid, node: DagNode, out: &mut Vec<DirEntry>) -> DagResult<()> {
        match node {
            DagNode::Directory { entries } => {
                out.extend(entries);
                Ok(())
            }
            DagNode::ShardedDirectory { shards } => {
                for shard in shards {
                    let child = self.node(&shard.cid)?;
                    self.collect_entries(&shard.cid, child, out)?;
                }
                Ok(())
            }
            _ => Err(DagError::Malformed {
                cid: *cid,
                reason: "directory shard is not a directory".into(),
            }),
        }
    }

    /// Every CID reachable from `root`, pre-order, each listed once.
    ///
    /// Fails with a not-found store error if any block is absent.
    pub fn walk(&self, root: &Cid) -> DagResult<Vec<Cid>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![*root];
        while let Some(cid) = stack.pop() {
            if !seen.insert(cid) {
                continue;
            }
            order.push(cid);
            let node = self.node(&cid)?;
            stack.extend(node.links().into_iter().rev());
        }
        Ok(order)
    }

    /// CIDs reachable from `root` that are not in the store yet.
    ///
    /// Only present nodes can be expanded, so the result is the current
    /// frontier of the DAG rather than its full remainder.
    pub fn missing(&self, root: &Cid) -> DagResult<Vec<Cid>> {
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        let mut stack = vec![*root];
        while let Some(cid) = stack.pop() {
            if !seen.insert(cid) {
                continue;
            }
            match self.store.get(&cid) {
                Ok(block) => stack.extend(DagNode::decode(&block)?.links()),
                Err(e) if e.is_not_found() => missing.push(cid),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(missing)
    }

    /// Materialize the DAG at `dest`: a file root becomes a file, a
    /// directory root becomes a directory tree. Returns content bytes written.
    pub fn write_to(&self, cid: &Cid, dest: &Path) -> DagResult<u64> {
        let node = self.node(cid)?;
        match node.kind() {
            EntryKind::Directory => {
                std::fs::create_dir_all(dest).map_err(|e| DagError::io(dest, e))?;
                let mut total: u64 = 0;
                for entry in self.entries(cid, node)? {
                    check_name(&entry.name)?;
                    let written = self.write_to(&entry.cid, &dest.join(&entry.name))?;
                    total = total.saturating_add(written);
                }
                Ok(total)
            }
            EntryKind::File => {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| DagError::io(parent, e))?;
                }
                let file = File::create(dest).map_err(|e| DagError::io(dest, e))?;
                let mut out = BufWriter::new(file);
                let written = self.emit_file(cid, &mut out, dest)?;
                out.flush().map_err(|e| DagError::io(dest, e))?;
                Ok(written)
            }
        }
    }

    fn emit_file<W: Write>(&self, cid: &Cid, out: &mut W, path: &Path) -> DagResult<u64> {
        match self.node(cid)? {
            DagNode::Leaf(data) => {
                out.write_all(&data).map_err(|e| DagError::io(path, e))?;
                Ok(data.len() as u64)
            }
            DagNode::File { links, .. } => {
                let mut total = 0;
                for link in links {
                    let written = self.emit_file(&link.cid, out, path)?;
                    if written != link.size {
                        return Err(DagError::Malformed {
                            cid: *cid,
                            reason: format!(
                                "link {} claims {} bytes, holds {written}",
                                link.cid, link.size
                            ),
                        });
                    }
                    total += written;
                }
                Ok(total)
            }
            DagNode::Directory { .. } | DagNode::ShardedDirectory { .. } => {
                Err(DagError::NotAFile(*cid))
            }
        }
    }
}
