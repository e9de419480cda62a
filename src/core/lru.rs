//! Hash table with per-entry TTL and time-wheel eviction.
//!
//! The wall clock is synthetic: the owner advances it with
//! [`LruTable::step`] using capture timestamps, so offline replays expire
//! entries at the same points a live run would. Expired values accumulate in
//! an internal queue and are drained with [`LruTable::pop_expired`].
//!
//! Entries live in an index arena; the hash buckets and the timeslot ring
//! both store arena indices, so eviction never chases owning pointers.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::Hasher;

use thiserror::Error;

/// Upper bound on key material accepted by [`LruTable::put`].
pub const MAX_KEY_LEN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("key length {0} exceeds the maximum key length")]
    KeyTooLong(usize),

    #[error("ttl {0} outside the timeslot ring of {1} seconds")]
    InvalidTtl(u64, usize),

    #[error("table is full ({0} entries)")]
    Full(usize),
}

/// An opaque byte key assembled incrementally and finalized into a 64-bit
/// hash before lookup or insertion.
#[derive(Debug, Default, Clone)]
pub struct HashKey {
    buf: Vec<u8>,
    hash: u64,
}

impl HashKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.hash = 0;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Compute the 64-bit hash over the accumulated bytes.
    pub fn finalize(&mut self) {
        let mut hasher = DefaultHasher::new();
        hasher.write(&self.buf);
        self.hash = hasher.finish();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

struct Node<T> {
    key: Vec<u8>,
    hash: u64,
    slot: usize,
    value: T,
}

/// Fixed-bucket hash table with TTL expiry driven by a timeslot ring.
pub struct LruTable<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    buckets: Vec<Vec<usize>>,
    ring: Vec<Vec<usize>>,
    tick: usize,
    expired: VecDeque<T>,
    len: usize,
    max_entries: usize,
}

impl<T> LruTable<T> {
    /// `ring_size` bounds the largest usable TTL in seconds; `bucket_count`
    /// sets both the hash bucket count and the entry capacity.
    pub fn new(ring_size: usize, bucket_count: usize) -> Self {
        let ring_size = ring_size.max(2);
        let bucket_count = bucket_count.max(1);
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            buckets: vec![Vec::new(); bucket_count],
            ring: vec![Vec::new(); ring_size],
            tick: 0,
            expired: VecDeque::new(),
            len: 0,
            max_entries: bucket_count,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    fn find(&self, key: &HashKey) -> Option<usize> {
        let bucket = &self.buckets[self.bucket_of(key.hash())];
        bucket.iter().copied().find(|&idx| {
            self.nodes[idx]
                .as_ref()
                .is_some_and(|n| n.hash == key.hash() && n.key == key.as_bytes())
        })
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: &HashKey) -> Option<&T> {
        self.find(key)
            .and_then(|idx| self.nodes[idx].as_ref())
            .map(|n| &n.value)
    }

    pub fn get_mut(&mut self, key: &HashKey) -> Option<&mut T> {
        let idx = self.find(key)?;
        self.nodes[idx].as_mut().map(|n| &mut n.value)
    }

    /// Insert `value` under `key` with the given TTL in seconds, or refresh
    /// the existing entry (replacing its value and rescheduling its expiry).
    pub fn put(&mut self, ttl: u64, key: &HashKey, value: T) -> Result<(), TableError> {
        if key.len() > MAX_KEY_LEN {
            return Err(TableError::KeyTooLong(key.len()));
        }
        if ttl == 0 || ttl as usize >= self.ring.len() {
            return Err(TableError::InvalidTtl(ttl, self.ring.len()));
        }
        let slot = (self.tick + ttl as usize) % self.ring.len();

        if let Some(idx) = self.find(key) {
            let old_slot = self.nodes[idx].as_ref().map(|n| n.slot);
            if let Some(old) = old_slot {
                if let Some(pos) = self.ring[old].iter().position(|&i| i == idx) {
                    self.ring[old].swap_remove(pos);
                }
            }
            if let Some(node) = self.nodes[idx].as_mut() {
                node.value = value;
                node.slot = slot;
            }
            self.ring[slot].push(idx);
            return Ok(());
        }

        if self.len >= self.max_entries {
            return Err(TableError::Full(self.len));
        }

        let node = Node {
            key: key.as_bytes().to_vec(),
            hash: key.hash(),
            slot,
            value,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        let bucket = self.bucket_of(key.hash());
        self.buckets[bucket].push(idx);
        self.ring[slot].push(idx);
        self.len += 1;
        Ok(())
    }

    /// Advance the synthetic clock by `delta` seconds, moving every entry
    /// whose residual TTL reaches zero into the expired queue.
    pub fn step(&mut self, delta: u64) {
        let size = self.ring.len();
        let sweep = (delta as usize).min(size);
        for i in 1..=sweep {
            let slot = (self.tick + i) % size;
            let idxs = std::mem::take(&mut self.ring[slot]);
            for idx in idxs {
                self.expire_node(idx);
            }
        }
        self.tick = (self.tick + (delta as usize) % size) % size;
    }

    fn expire_node(&mut self, idx: usize) {
        if let Some(node) = self.nodes[idx].take() {
            let bucket = self.bucket_of(node.hash);
            if let Some(pos) = self.buckets[bucket].iter().position(|&i| i == idx) {
                self.buckets[bucket].swap_remove(pos);
            }
            self.free.push(idx);
            self.len -= 1;
            self.expired.push_back(node.value);
        }
    }

    pub fn has_expired(&self) -> bool {
        !self.expired.is_empty()
    }

    pub fn pop_expired(&mut self) -> Option<T> {
        self.expired.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(bytes: &[u8]) -> HashKey {
        let mut key = HashKey::new();
        key.append(bytes);
        key.finalize();
        key
    }

    #[test]
    fn put_get_miss() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        let key = key_of(b"flow-a");
        table.put(10, &key, 7).unwrap();
        assert_eq!(table.get(&key), Some(&7));
        assert!(table.get(&key_of(b"flow-b")).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn expires_at_ttl_not_before() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        let key = key_of(b"flow-a");
        table.put(10, &key, 7).unwrap();

        table.step(9);
        assert!(!table.has_expired());
        assert!(table.get(&key).is_some());

        table.step(1);
        assert!(table.has_expired());
        assert_eq!(table.pop_expired(), Some(7));
        assert!(table.get(&key).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn large_step_expires_everything() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        table.put(10, &key_of(b"a"), 1).unwrap();
        table.put(50, &key_of(b"b"), 2).unwrap();
        table.step(1_000_000);
        assert_eq!(table.len(), 0);
        let mut drained = vec![];
        while let Some(v) = table.pop_expired() {
            drained.push(v);
        }
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
    }

    #[test]
    fn refresh_reschedules_expiry() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        let key = key_of(b"flow-a");
        table.put(10, &key, 7).unwrap();
        table.step(9);
        table.put(10, &key, 8).unwrap();
        table.step(9);
        assert!(!table.has_expired());
        assert_eq!(table.get(&key), Some(&8));
        table.step(1);
        assert_eq!(table.pop_expired(), Some(8));
    }

    #[test]
    fn rejects_oversized_key() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        let key = key_of(&[0u8; MAX_KEY_LEN + 1]);
        assert_eq!(
            table.put(10, &key, 1),
            Err(TableError::KeyTooLong(MAX_KEY_LEN + 1))
        );
    }

    #[test]
    fn rejects_bad_ttl() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        let key = key_of(b"a");
        assert!(matches!(
            table.put(0, &key, 1),
            Err(TableError::InvalidTtl(0, _))
        ));
        assert!(matches!(
            table.put(60, &key, 1),
            Err(TableError::InvalidTtl(60, _))
        ));
    }

    #[test]
    fn rejects_insert_when_full() {
        let mut table: LruTable<u32> = LruTable::new(60, 2);
        table.put(10, &key_of(b"a"), 1).unwrap();
        table.put(10, &key_of(b"b"), 2).unwrap();
        assert_eq!(table.put(10, &key_of(b"c"), 3), Err(TableError::Full(2)));
        // Refreshing an existing key still works at capacity.
        table.put(10, &key_of(b"a"), 9).unwrap();
        assert_eq!(table.get(&key_of(b"a")), Some(&9));
    }

    #[test]
    fn slots_are_recycled() {
        let mut table: LruTable<u32> = LruTable::new(60, 16);
        table.put(5, &key_of(b"a"), 1).unwrap();
        table.step(5);
        table.pop_expired().unwrap();
        table.put(5, &key_of(b"b"), 2).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&key_of(b"b")), Some(&2));
    }
}
