//! Node-local state: advertisements held as root, keys owned as
//! publisher, and the blob map behind them.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use weft_core::Id;
use weft_proto::NodeHandle;

/// One advertised publisher with its refresh deadline.
struct AdvertEntry {
    publisher: NodeHandle,
    expires_at: Instant,
}

/// Root-side advertisement store: `key → publishers`, TTL per publisher.
///
/// Entries arrive from `advertise` RPCs and surrogate handoffs, get
/// refreshed by each republish, and lapse when their deadline passes.
pub struct ObjectStore {
    entries: Mutex<HashMap<String, HashMap<Id, AdvertEntry>>>,
}

impl ObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or refreshes `(key, publisher)` with the given lifetime.
    pub fn advertise(&self, key: &str, publisher: NodeHandle, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.entry(key.to_string()).or_default().insert(
            publisher.id,
            AdvertEntry {
                publisher,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drops `(key, publisher)` immediately. Returns whether an entry
    /// existed.
    pub fn revoke(&self, key: &str, publisher: &Id) -> bool {
        let mut entries = self.entries.lock();
        let Some(publishers) = entries.get_mut(key) else {
            return false;
        };
        let removed = publishers.remove(publisher).is_some();
        if publishers.is_empty() {
            entries.remove(key);
        }
        removed
    }

    /// Live publishers for `key`; expired entries are pruned on the way.
    pub fn publishers(&self, key: &str) -> Vec<NodeHandle> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let Some(publishers) = entries.get_mut(key) else {
            return Vec::new();
        };
        publishers.retain(|_, e| e.expires_at > now);
        let live: Vec<NodeHandle> = publishers.values().map(|e| e.publisher.clone()).collect();
        if live.is_empty() {
            entries.remove(key);
        }
        live
    }

    /// Keys with at least one live publisher.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(_, pubs)| pubs.values().any(|e| e.expires_at > now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Extracts every entry the `newcomer` now roots instead of `local`:
    /// those whose hashed key picks the newcomer under `better_choice`.
    /// The extracted entries are removed from this store.
    pub fn take_for(&self, newcomer: &Id, local: &Id) -> Vec<(String, Vec<NodeHandle>)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let moving: Vec<String> = entries
            .keys()
            .filter(|key| Id::hash_of(key).better_choice(newcomer, local))
            .cloned()
            .collect();

        let mut moved = Vec::new();
        for key in moving {
            if let Some(publishers) = entries.remove(&key) {
                let live: Vec<NodeHandle> = publishers
                    .into_values()
                    .filter(|e| e.expires_at > now)
                    .map(|e| e.publisher)
                    .collect();
                if !live.is_empty() {
                    moved.push((key, live));
                }
            }
        }
        moved
    }

    /// Reinstates handed-off entries, granting each a fresh lifetime.
    /// Used on the receiving side of a transfer and to roll back a push
    /// the newcomer never acknowledged.
    pub fn restore(&self, entries: Vec<(String, Vec<NodeHandle>)>, ttl: Duration) {
        for (key, publishers) in entries {
            for publisher in publishers {
                self.advertise(&key, publisher, ttl);
            }
        }
    }

    /// Drops every lapsed entry. Runs on the maintenance tick.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, publishers| {
            publishers.retain(|_, e| e.expires_at > now);
            !publishers.is_empty()
        });
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Publisher-side record of locally owned keys, iterated by the
/// republish tick.
pub struct PublishedSet {
    keys: Mutex<HashSet<String>>,
}

impl PublishedSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }

    /// Marks `key` as locally owned.
    pub fn insert(&self, key: &str) {
        self.keys.lock().insert(key.to_string());
    }

    /// Unmarks `key`. Returns whether it was owned.
    pub fn remove(&self, key: &str) -> bool {
        self.keys.lock().remove(key)
    }

    /// Snapshot of owned keys.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().iter().cloned().collect()
    }
}

impl Default for PublishedSet {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory blob map. The overlay's contract with storage is only
/// `key → bytes`; nothing here survives a restart, by design.
pub struct BlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl BlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `bytes` under `key`, replacing any previous value.
    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.write().insert(key.to_string(), bytes);
    }

    /// Returns the bytes stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(key).cloned()
    }

    /// Deletes `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.blobs.write().remove(key).is_some()
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(prefix: &str) -> NodeHandle {
        NodeHandle::new(
            Id::from_prefix(prefix).unwrap(),
            "127.0.0.1:0".parse().unwrap(),
        )
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_advertise_and_lookup() {
        let store = ObjectStore::new();
        store.advertise("key1", handle("1230"), TTL);
        store.advertise("key1", handle("1221"), TTL);
        store.advertise("key1", handle("1230"), TTL); // refresh, not dup

        let publishers = store.publishers("key1");
        assert_eq!(publishers.len(), 2);
        assert!(store.publishers("other").is_empty());
    }

    #[test]
    fn test_revoke() {
        let store = ObjectStore::new();
        let publisher = handle("1230");
        store.advertise("key1", publisher.clone(), TTL);

        assert!(store.revoke("key1", &publisher.id));
        assert!(!store.revoke("key1", &publisher.id));
        assert!(store.publishers("key1").is_empty());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_expired_entries_lapse() {
        let store = ObjectStore::new();
        store.advertise("key1", handle("1230"), Duration::from_millis(0));
        store.advertise("key2", handle("1221"), TTL);

        std::thread::sleep(Duration::from_millis(5));
        assert!(store.publishers("key1").is_empty());
        assert_eq!(store.publishers("key2").len(), 1);

        store.sweep_expired();
        assert_eq!(store.keys(), vec!["key2".to_string()]);
    }

    #[test]
    fn test_take_for_moves_only_better_rooted_keys() {
        let store = ObjectStore::new();
        let local = Id::from_prefix("1221").unwrap();
        store.advertise("key1", handle("1230"), TTL);

        // A newcomer no closer to the key's hash than local takes nothing.
        let moved = store.take_for(&local, &local);
        assert!(moved.is_empty());

        // A newcomer that IS the hash takes the entry.
        let perfect = Id::hash_of("key1");
        let moved = store.take_for(&perfect, &local);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].0, "key1");
        assert!(store.publishers("key1").is_empty());

        // And restore puts it back.
        store.restore(moved, TTL);
        assert_eq!(store.publishers("key1").len(), 1);
    }

    #[test]
    fn test_published_set() {
        let set = PublishedSet::new();
        set.insert("key1");
        set.insert("key1");
        assert_eq!(set.keys(), vec!["key1".to_string()]);
        assert!(set.remove("key1"));
        assert!(!set.remove("key1"));
    }

    #[test]
    fn test_blob_store() {
        let blobs = BlobStore::new();
        blobs.put("key1", b"value1".to_vec());
        assert_eq!(blobs.get("key1"), Some(b"value1".to_vec()));

        blobs.put("key1", b"value_replace".to_vec());
        assert_eq!(blobs.get("key1"), Some(b"value_replace".to_vec()));

        assert!(blobs.remove("key1"));
        assert_eq!(blobs.get("key1"), None);
    }
}
