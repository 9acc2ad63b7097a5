use fsg_types::{PeerId, PeerInfo};

use crate::key::Key;

#[derive(Clone, Copy, Debug)]
struct Entry {
    info: PeerInfo,
    key: Key,
}

/// Kademlia routing table: 256 buckets of at most `k` peers each.
///
/// Within a bucket peers are kept least-recently-seen first. A full bucket
/// keeps its existing peers and drops the newcomer.
#[derive(Debug)]
pub struct RoutingTable {
    local: Key,
    local_id: PeerId,
    k: usize,
    buckets: Vec<Vec<Entry>>,
}

impl RoutingTable {
    pub fn new(local_id: PeerId, k: usize) -> Self {
        Self {
            local: Key::for_peer(&local_id),
            local_id,
            k: k.max(1),
            buckets: vec![Vec::new(); Key::BITS],
        }
    }

    /// Insert or refresh a peer. Returns `false` if it was not added
    /// (the local peer, or its bucket is full).
    pub fn insert(&mut self, info: PeerInfo) -> bool {
        if info.id == self.local_id {
            return false;
        }
        let key = Key::for_peer(&info.id);
        let Some(index) = key.bucket_index(&self.local) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket.iter().position(|e| e.info.id == info.id) {
            bucket.remove(pos);
            bucket.push(Entry { info, key });
            return true;
        }
        if bucket.len() >= self.k {
            return false;
        }
        bucket.push(Entry { info, key });
        true
    }

    pub fn remove(&mut self, id: &PeerId) -> bool {
        let key = Key::for_peer(id);
        let Some(index) = key.bucket_index(&self.local) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        let before = bucket.len();
        bucket.retain(|e| e.info.id != *id);
        bucket.len() != before
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        let key = Key::for_peer(id);
        key.bucket_index(&self.local)
            .is_some_and(|i| self.buckets[i].iter().any(|e| e.info.id == *id))
    }

    /// Up to `n` known peers ordered by XOR distance to `target`.
    pub fn closest(&self, target: &Key, n: usize) -> Vec<PeerInfo> {
        let mut all: Vec<(Key, PeerInfo)> = self
            .buckets
            .iter()
            .flatten()
            .map(|e| (e.key.distance(target), e.info))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().take(n).map(|(_, info)| info).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.buckets.iter().flatten().map(|e| e.info).collect()
    }
}
