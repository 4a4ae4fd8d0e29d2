//! Byte-budgeted LRU of sliced source images.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use crate::processing::layout::GridGeometry;
use crate::processing::slice::{ImageId, Slices};

pub const DEFAULT_BUDGET_BYTES: usize = 5 * 1024 * 1024;

/// Identity of one slicing result: the same image cut for another grid is a
/// different entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SliceKey {
    pub id: ImageId,
    pub width: u32,
    pub squares_per_row: u32,
}

impl SliceKey {
    pub fn new(id: ImageId, geometry: &GridGeometry) -> Self {
        Self {
            id,
            width: geometry.width(),
            squares_per_row: geometry.squares_per_row(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Default)]
struct Inner {
    map: HashMap<SliceKey, Slices>,
    // front = least recently used
    lru: VecDeque<SliceKey>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &SliceKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            if let Some(k) = self.lru.remove(pos) {
                self.lru.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &SliceKey) {
        if let Some(old) = self.map.remove(key) {
            self.total_bytes = self.total_bytes.saturating_sub(slices_bytes(&old));
            self.lru.retain(|k| k != key);
        }
    }
}

pub struct SliceCache {
    budget: usize,
    inner: Mutex<Inner>,
}

impl SliceCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget: budget_bytes,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, key: &SliceKey) -> Option<Slices> {
        let mut inner = self.inner.lock();
        match inner.map.get(key).cloned() {
            Some(slices) => {
                inner.hits += 1;
                inner.touch(key);
                debug!(?key.id, "slice cache hit");
                Some(slices)
            }
            None => {
                inner.misses += 1;
                debug!(?key.id, "slice cache miss");
                None
            }
        }
    }

    /// Store `slices`, evicting least recently used entries until the budget
    /// holds. Entries bigger than the whole budget are not kept.
    pub fn insert(&self, key: SliceKey, slices: Slices) {
        let bytes = slices_bytes(&slices);
        let mut inner = self.inner.lock();
        inner.remove(&key);
        if bytes > self.budget {
            debug!(?key.id, bytes, budget = self.budget, "slices exceed cache budget");
            return;
        }
        while inner.total_bytes + bytes > self.budget {
            let Some(oldest) = inner.lru.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.map.remove(&oldest) {
                inner.total_bytes = inner.total_bytes.saturating_sub(slices_bytes(&evicted));
                debug!(?oldest.id, "evicted slices");
            }
        }
        inner.total_bytes += bytes;
        inner.lru.push_back(key.clone());
        inner.map.insert(key, slices);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.lru.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.map.len(),
            bytes: inner.total_bytes,
        }
    }
}

impl Default for SliceCache {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_BYTES)
    }
}

fn slices_bytes(slices: &Slices) -> usize {
    slices.iter().map(|s| s.as_raw().len()).sum()
}
