use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fsg_types::Cid;

#[derive(Debug)]
struct WantEntry {
    /// Fetches currently waiting on this CID.
    refs: usize,
    added: Instant,
    last_query: Instant,
}

/// The set of CIDs this node currently needs.
///
/// Shared by every fetch and session; all operations are atomic with
/// respect to each other. Several fetches may want the same CID, so entries
/// are reference counted until the block arrives.
#[derive(Debug, Default)]
pub struct WantList {
    entries: Mutex<HashMap<Cid, WantEntry>>,
}

impl WantList {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Cid, WantEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Want `cid`. Returns `true` if it was not wanted before.
    pub fn add(&self, cid: Cid) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get_mut(&cid) {
            Some(entry) => {
                entry.refs += 1;
                false
            }
            None => {
                entries.insert(
                    cid,
                    WantEntry {
                        refs: 1,
                        added: now,
                        last_query: now,
                    },
                );
                true
            }
        }
    }

    /// The block arrived: drop the entry for every waiter.
    /// Returns `true` if it was wanted.
    pub fn remove(&self, cid: &Cid) -> bool {
        self.entries().remove(cid).is_some()
    }

    /// One waiter gave up on `cid`. Returns `true` if the entry is now gone.
    pub fn release(&self, cid: &Cid) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(cid) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            entries.remove(cid);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.entries().contains_key(cid)
    }

    pub fn snapshot(&self) -> Vec<Cid> {
        let mut cids: Vec<Cid> = self.entries().keys().copied().collect();
        cids.sort();
        cids
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How long `cid` has been wanted.
    pub fn age(&self, cid: &Cid) -> Option<Duration> {
        self.entries().get(cid).map(|e| e.added.elapsed())
    }

    /// Among `candidates`, the wanted CIDs whose last provider query is at
    /// least `interval` old. Their query time is reset to now.
    pub fn due_for_requery<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a Cid>,
        interval: Duration,
    ) -> Vec<Cid> {
        let now = Instant::now();
        let mut entries = self.entries();
        let mut due = Vec::new();
        for cid in candidates {
            if let Some(entry) = entries.get_mut(cid) {
                if now.duration_since(entry.last_query) >= interval {
                    entry.last_query = now;
                    due.push(*cid);
                }
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn cid(n: u8) -> Cid {
        Cid::from_digest([n; 32])
    }

    #[test]
    fn set_semantics() {
        let wants = WantList::new();
        assert!(wants.add(cid(1)));
        assert!(!wants.add(cid(1)));
        assert_eq!(wants.len(), 1);
        assert!(wants.contains(&cid(1)));
        assert!(wants.remove(&cid(1)));
        assert!(!wants.remove(&cid(1)));
        assert!(wants.is_empty());
    }

    #[test]
    fn release_counts_waiters() {
        let wants = WantList::new();
        wants.add(cid(1));
        wants.add(cid(1));
        assert!(!wants.release(&cid(1)));
        assert!(wants.contains(&cid(1)));
        assert!(wants.release(&cid(1)));
        assert!(!wants.contains(&cid(1)));
    }

    #[test]
    fn requery_waits_for_interval() {
        let wants = WantList::new();
        wants.add(cid(1));
        wants.add(cid(2));
        let interval = Duration::from_millis(20);
        let all = [cid(1), cid(2), cid(3)];
        assert!(wants.due_for_requery(&all, interval).is_empty());

        std::thread::sleep(Duration::from_millis(30));
        let mut due = wants.due_for_requery(&all, interval);
        due.sort();
        assert_eq!(due, vec![cid(1), cid(2)]);
        // just queried
        assert!(wants.due_for_requery(&all, interval).is_empty());
    }

    #[test]
    fn concurrent_add_remove_is_consistent() {
        let wants = Arc::new(WantList::new());
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let wants = Arc::clone(&wants);
                std::thread::spawn(move || {
                    for i in 0..100u8 {
                        let c = Cid::from_digest([t, i].repeat(16).try_into().unwrap());
                        wants.add(c);
                        if i % 2 == 0 {
                            wants.remove(&c);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wants.len(), 200);
    }
}
