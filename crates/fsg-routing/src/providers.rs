use std::collections::HashMap;
use std::time::{Duration, Instant};

use fsg_types::PeerInfo;

use crate::key::Key;

/// One advertisement that `peer` holds the content at a key.
#[derive(Clone, Copy, Debug)]
pub struct ProviderRecord {
    pub peer: PeerInfo,
    pub advertised_at: Instant,
}

/// Provider records held by a DHT server node, expiring after a TTL.
#[derive(Debug)]
pub struct ProviderStore {
    records: HashMap<Key, Vec<ProviderRecord>>,
    ttl: Duration,
}

impl ProviderStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            ttl,
        }
    }

    /// Add or refresh a provider for `key`.
    pub fn add(&mut self, key: Key, peer: PeerInfo) {
        let now = Instant::now();
        let records = self.records.entry(key).or_default();
        match records.iter_mut().find(|r| r.peer.id == peer.id) {
            Some(existing) => {
                existing.peer = peer;
                existing.advertised_at = now;
            }
            None => records.push(ProviderRecord {
                peer,
                advertised_at: now,
            }),
        }
    }

    /// Live providers for `key`, most recently advertised first.
    pub fn providers(&self, key: &Key) -> Vec<PeerInfo> {
        let Some(records) = self.records.get(key) else {
            return Vec::new();
        };
        let mut live: Vec<&ProviderRecord> =
            records.iter().filter(|r| r.advertised_at.elapsed() < self.ttl).collect();
        live.sort_by(|a, b| b.advertised_at.cmp(&a.advertised_at));
        live.into_iter().map(|r| r.peer).collect()
    }

    /// Drop expired records. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.records.retain(|_, records| {
            let before = records.len();
            records.retain(|r| r.advertised_at.elapsed() < ttl);
            removed += before - records.len();
            !records.is_empty()
        });
        removed
    }

    /// Number of keys with at least one record.
    pub fn key_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use fsg_types::PeerId;

    use super::*;

    fn provider(n: u8) -> PeerInfo {
        PeerInfo::new(PeerId::from_raw([n; 32]), "127.0.0.1:5000".parse().unwrap())
    }

    #[test]
    fn add_and_lookup() {
        let mut store = ProviderStore::new(Duration::from_secs(60));
        let key = Key::from_bytes([1; 32]);
        store.add(key, provider(1));
        store.add(key, provider(2));
        store.add(key, provider(1));

        let found = store.providers(&key);
        assert_eq!(found.len(), 2);
        // refreshed record sorts first
        assert_eq!(found[0].id, provider(1).id);
        assert!(store.providers(&Key::from_bytes([2; 32])).is_empty());
    }

    #[test]
    fn expired_records_are_hidden_and_pruned() {
        let mut store = ProviderStore::new(Duration::from_millis(5));
        let key = Key::from_bytes([1; 32]);
        store.add(key, provider(1));
        std::thread::sleep(Duration::from_millis(20));

        assert!(store.providers(&key).is_empty());
        assert_eq!(store.prune(), 1);
        assert_eq!(store.key_count(), 0);
    }
}
