use std::collections::HashMap;

use hmac::{Hmac, Mac};
use log::{info, warn};
use sha2::Sha256;

use crate::utils::crypto::is_between;
use crate::utils::time::{has_expired, now};
use crate::utils::types::{ExpirationDate, HashPos};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expiration_date: ExpirationDate,
    tag: Vec<u8>,
}

/// Authenticated, expiring key value store. Keys are hex identifiers on
/// the ring, values are opaque bytes. Every entry carries an
/// HMAC-SHA256 tag over the raw value, recomputed and checked on read.
#[derive(Debug)]
pub struct KvStore {
    entries: HashMap<String, StoredValue>,
    secret: Vec<u8>,
}

impl KvStore {
    pub fn new(secret: Vec<u8>) -> KvStore {
        KvStore {
            entries: HashMap::new(),
            secret,
        }
    }

    pub fn put(&mut self, key: &str, value: &[u8], ttl: u64) -> bool {
        let tag = self.compute_tag(value);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                expiration_date: now().as_secs() + ttl,
                tag,
            },
        );
        true
    }

    /// Fetches a value. Expired entries are dropped, a tag mismatch is
    /// treated as a miss.
    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?.clone();
        if has_expired(&entry.expiration_date) {
            let since = now().as_secs() - entry.expiration_date;
            info!("Value for key {} expired {} seconds ago, removing it", key, since);
            self.entries.remove(key);
            return None;
        }
        if !self.verify_tag(&entry.value, &entry.tag) {
            warn!("Tag mismatch for key {}, treating as missing", key);
            return None;
        }
        Some(entry.value)
    }

    pub fn delete(&mut self, keys: &[String]) {
        for key in keys {
            self.entries.remove(key);
        }
    }

    /// All entries whose id lies strictly inside the open arc
    /// (left, right). Only used during the join handoff.
    pub fn range(&self, left: HashPos, right: HashPos) -> (Vec<String>, Vec<Vec<u8>>) {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        for (key, entry) in self.entries.iter() {
            let pos = match HashPos::from_str_radix(key, 16) {
                Ok(pos) => pos,
                Err(_) => continue,
            };
            if is_between(pos, left, right, false, false) {
                keys.push(key.clone());
                values.push(entry.value.clone());
            }
        }
        (keys, values)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of all live entries for the shutdown handoff.
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>, ExpirationDate)> {
        self.entries
            .iter()
            .filter(|(_, entry)| !has_expired(&entry.expiration_date))
            .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.expiration_date))
            .collect()
    }

    fn compute_tag(&self, value: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts keys of any size");
        mac.update(value);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify_tag(&self, value: &[u8], tag: &[u8]) -> bool {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts keys of any size");
        mac.update(value);
        mac.verify_slice(tag).is_ok()
    }

    #[cfg(test)]
    fn corrupt(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value.push(0xff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::{hash, init_test_ring};

    fn store() -> KvStore {
        init_test_ring();
        KvStore::new(b"test_secret".to_vec())
    }

    #[test]
    fn put_then_get_roundtrips() {
        let mut store = store();
        let key = hash(b"hello").hex;
        assert!(store.put(&key, b"world", 3600));
        assert_eq!(store.get(&key), Some(b"world".to_vec()));
    }

    #[test]
    fn expired_entries_are_gone() {
        let mut store = store();
        let key = hash(b"hello2").hex;
        store.put(&key, b"world2", 0);
        assert_eq!(store.get(&key), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn corrupted_values_read_as_missing() {
        let mut store = store();
        let key = hash(b"hello3").hex;
        store.put(&key, b"world3", 3600);
        store.corrupt(&key);
        assert_eq!(store.get(&key), None);
    }

    #[test]
    fn delete_removes_a_batch() {
        let mut store = store();
        let keys: Vec<String> = [&b"a"[..], b"b", b"c"].iter().map(|k| hash(k).hex).collect();
        for key in &keys {
            store.put(key, b"v", 3600);
        }
        store.delete(&keys[..2]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&keys[2]), Some(b"v".to_vec()));
    }

    #[test]
    fn range_returns_ids_strictly_inside_the_arc() {
        let mut store = store();
        let ids: Vec<_> = (0u32..8).map(|i| hash(format!("key_{}", i).as_bytes())).collect();
        for id in &ids {
            store.put(&id.hex, id.hex.as_bytes(), 3600);
        }

        let mut sorted = ids.clone();
        sorted.sort_by_key(|id| id.pos);
        let left = sorted[1].pos;
        let right = sorted[5].pos;

        let (keys, values) = store.range(left, right);
        assert_eq!(keys.len(), values.len());
        let expected: Vec<_> = sorted[2..5].iter().map(|id| id.hex.clone()).collect();
        let mut got = keys.clone();
        got.sort();
        let mut want = expected.clone();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn surviving_replica_answers_after_chain_deletions() {
        // the replica chain is id, hash(id), hash(hash(id)), ...
        let mut store = store();
        let mut key = hash(b"some_client_key").hex;
        let mut chain = Vec::new();
        for _ in 0..4 {
            let id = hash(key.as_bytes());
            store.put(&id.hex, b"replicated", 3600);
            chain.push(id.hex.clone());
            key = id.hex;
        }

        // drop all but the last copy, replaying the chain still hits
        store.delete(&chain[..3]);
        let mut probe = hash(b"some_client_key").hex;
        let mut found = None;
        for _ in 0..4 {
            let id = hash(probe.as_bytes());
            if let Some(value) = store.get(&id.hex) {
                found = Some(value);
                break;
            }
            probe = id.hex;
        }
        assert_eq!(found, Some(b"replicated".to_vec()));
    }
}
