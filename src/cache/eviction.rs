//! Capacity-bounded keyed store with pluggable policies
//!
//! `EvictionCache` owns its entries (`Arc<Item>` in a `HashMap`) and keeps a
//! running total weight. What an entry weighs, when it is idle, how old it
//! is and how it is torn down are all decided by a [`CachePolicy`].
//! Teardown is split in two: the logical `delete` runs with the index
//! locked, the physical `dispose` only after the entry left the index and
//! the lock is released.
//!
//! Eviction walks entries oldest-first, skips non-idle ones, and stops as
//! soon as the total is back within capacity. If idle candidates run out
//! first the overflow is reported, not corrected.
//!
//! With autoload enabled a miss in [`EvictionCache::find`] constructs the
//! entry through the policy, inserts it, and runs the policy's load step on
//! the calling thread before returning it.

use crate::cache::stats::{CacheStats, CacheStatsTracker};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Policy functions an [`EvictionCache`] is parametrized with
pub trait CachePolicy: Send + Sync {
    type Key: Eq + Hash + Clone + Debug + Send + Sync;
    type Item: Send + Sync;

    /// Current capacity limit
    fn capacity(&self) -> u64;

    /// Weight of an item at insertion time
    fn weight(&self, item: &Self::Item) -> u64;

    /// True if the item has no active clients
    fn is_idle(&self, item: &Self::Item) -> bool;

    /// Recency used for LRU ordering
    fn timestamp(&self, item: &Self::Item) -> SystemTime;

    fn set_timestamp(&self, item: &Self::Item, time: SystemTime);

    /// Logically tear the item down; returns whether it may leave the index
    ///
    /// Called with the index locked, so it must not block on I/O.
    fn delete(&self, item: &Self::Item) -> bool;

    /// Physically tear down an item that already left the index
    fn dispose(&self, _item: &Self::Item) {}

    /// Build an item for a missing key
    ///
    /// `reporter` adjusts the entry's weight once it is inserted. Returning
    /// `None` means the key cannot be cached.
    fn construct(
        &self,
        _key: &Self::Key,
        _reporter: WeightReporter<Self::Key, Self::Item>,
    ) -> Option<Self::Item> {
        None
    }

    /// Populate a freshly inserted item; returns false when it stays unusable
    fn load(&self, _item: &Arc<Self::Item>) -> bool {
        true
    }
}

/// Outcome of [`EvictionCache::add`]
#[derive(Debug)]
pub enum AddResult<V> {
    Inserted(Arc<V>),
    /// The key was present; the offered item was dropped and the existing
    /// entry is returned unchanged
    Duplicate(Arc<V>),
}

impl<V> AddResult<V> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, AddResult::Inserted(_))
    }

    pub fn into_item(self) -> Arc<V> {
        match self {
            AddResult::Inserted(item) | AddResult::Duplicate(item) => item,
        }
    }
}

/// What a single [`EvictionCache::evict`] run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport<K> {
    /// Keys removed, oldest first
    pub evicted: Vec<K>,
    pub freed_bytes: u64,
    /// Total weight after the run
    pub total_weight: u64,
    /// No idle candidate was left while still above capacity
    pub over_capacity: bool,
}

impl<K> Default for EvictionReport<K> {
    fn default() -> Self {
        Self {
            evicted: Vec::new(),
            freed_bytes: 0,
            total_weight: 0,
            over_capacity: false,
        }
    }
}

struct Slot<V> {
    item: Arc<V>,
    weight: u64,
    id: u64,
}

struct Index<K, V> {
    entries: HashMap<K, Slot<V>>,
    total_weight: u64,
    next_id: u64,
}

impl<K: Eq + Hash, V> Index<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_weight: 0,
            next_id: 0,
        }
    }

    fn reserve_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert(&mut self, key: K, id: u64, item: V, weight: u64) -> AddResult<V> {
        match self.entries.entry(key) {
            Entry::Occupied(existing) => AddResult::Duplicate(existing.get().item.clone()),
            Entry::Vacant(vacant) => {
                let item = Arc::new(item);
                vacant.insert(Slot {
                    item: item.clone(),
                    weight,
                    id,
                });
                self.total_weight += weight;
                AddResult::Inserted(item)
            }
        }
    }

    fn remove(&mut self, key: &K) -> Option<Slot<V>> {
        let slot = self.entries.remove(key)?;
        self.total_weight = self.total_weight.saturating_sub(slot.weight);
        Some(slot)
    }
}

/// Handle through which an item reports weight changes to its cache
///
/// Bound to one key and one insertion: once the entry is removed or
/// replaced, reports are ignored.
pub struct WeightReporter<K, V> {
    index: Weak<Mutex<Index<K, V>>>,
    key: K,
    id: u64,
}

impl<K: Clone, V> Clone for WeightReporter<K, V> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            key: self.key.clone(),
            id: self.id,
        }
    }
}

impl<K: Eq + Hash, V> WeightReporter<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Apply a signed weight delta; the entry weight never drops below zero
    pub fn report(&self, delta: i64) {
        let Some(index) = self.index.upgrade() else {
            return;
        };
        let mut guard = index.lock();
        let index = &mut *guard;
        let Some(slot) = index.entries.get_mut(&self.key) else {
            return;
        };
        if slot.id != self.id {
            return;
        }
        let updated = (slot.weight as i64).saturating_add(delta).max(0) as u64;
        index.total_weight = index.total_weight - slot.weight + updated;
        slot.weight = updated;
    }
}

/// Keyed store with capacity-driven LRU eviction
pub struct EvictionCache<P: CachePolicy> {
    policy: P,
    index: Arc<Mutex<Index<P::Key, P::Item>>>,
    autoload: bool,
    start_time: Mutex<SystemTime>,
    stats: CacheStatsTracker,
}

impl<P: CachePolicy> EvictionCache<P> {
    pub fn new(policy: P, autoload: bool) -> Self {
        Self {
            policy,
            index: Arc::new(Mutex::new(Index::new())),
            autoload,
            start_time: Mutex::new(SystemTime::now()),
            stats: CacheStatsTracker::new(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn autoload(&self) -> bool {
        self.autoload
    }

    /// Reporter for an entry about to be inserted under `key`
    pub fn weight_reporter(&self, key: &P::Key) -> WeightReporter<P::Key, P::Item> {
        let id = self.index.lock().reserve_id();
        WeightReporter {
            index: Arc::downgrade(&self.index),
            key: key.clone(),
            id,
        }
    }

    /// Insert an item unless the key is already present
    ///
    /// Runs eviction when the insertion pushes the total above capacity.
    pub fn add(&self, key: P::Key, item: P::Item) -> AddResult<P::Item> {
        let reporter = self.weight_reporter(&key);
        self.add_with_reporter(reporter, item)
    }

    /// Insert an item built with `reporter`, under the reporter's key
    pub fn add_with_reporter(
        &self,
        reporter: WeightReporter<P::Key, P::Item>,
        item: P::Item,
    ) -> AddResult<P::Item> {
        let weight = self.policy.weight(&item);
        let key = reporter.key;
        let result = self.index.lock().insert(key.clone(), reporter.id, item, weight);
        match &result {
            AddResult::Inserted(_) => {
                debug!(key = ?key, weight = weight, "Cache entry added");
                self.evict_if_over_capacity();
            }
            AddResult::Duplicate(_) => {
                debug!(key = ?key, "Cache entry already present, discarding duplicate");
            }
        }
        result
    }

    /// Look an entry up, constructing and loading it on a miss if autoload is on
    ///
    /// A hit refreshes the entry's timestamp. A miss pays the full load on
    /// the calling thread.
    pub fn find(&self, key: &P::Key) -> Option<Arc<P::Item>> {
        let existing = self.index.lock().entries.get(key).map(|s| s.item.clone());
        if let Some(item) = existing {
            self.stats.increment_hits();
            self.policy.set_timestamp(&item, SystemTime::now());
            return Some(item);
        }

        self.stats.increment_misses();
        if !self.autoload {
            return None;
        }

        let reporter = self.weight_reporter(key);
        let item = self.policy.construct(key, reporter.clone())?;
        let item = match self.add_with_reporter(reporter, item) {
            AddResult::Inserted(item) => item,
            // Another thread inserted the key while we were constructing.
            AddResult::Duplicate(existing) => return Some(existing),
        };

        self.load(&item);
        Some(item)
    }

    /// Run the policy's load step on an entry, then evict if it grew too big
    pub fn load(&self, item: &Arc<P::Item>) -> bool {
        let loaded = self.policy.load(item);
        if !loaded {
            self.stats.increment_load_failures();
        }
        self.evict_if_over_capacity();
        loaded
    }

    /// Peek without touching timestamps, statistics or autoload
    pub fn get(&self, key: &P::Key) -> Option<Arc<P::Item>> {
        self.index.lock().entries.get(key).map(|s| s.item.clone())
    }

    /// Drop the index entry without any idleness check
    pub fn remove(&self, key: &P::Key) -> Option<Arc<P::Item>> {
        self.index.lock().remove(key).map(|slot| slot.item)
    }

    /// Tear an entry down through the policy and drop it from the index
    ///
    /// Returns false if the entry is missing, not idle, or the policy
    /// refused to delete it.
    pub fn delete(&self, key: &P::Key, physically: bool) -> bool {
        let item = {
            let mut index = self.index.lock();
            let Some(slot) = index.entries.get(key) else {
                return false;
            };
            let item = slot.item.clone();
            if !self.policy.is_idle(&item) || !self.policy.delete(&item) {
                return false;
            }
            index.remove(key);
            item
        };
        if physically {
            self.policy.dispose(&item);
        }
        true
    }

    /// Keep only the entries for which `keep` returns true
    ///
    /// Dropped entries are forgotten, not disposed. `keep` runs with the
    /// index locked. Returns how many entries were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&P::Item) -> bool) -> usize {
        let mut index = self.index.lock();
        let before = index.entries.len();
        let mut freed = 0u64;
        index.entries.retain(|_, slot| {
            let kept = keep(&slot.item);
            if !kept {
                freed += slot.weight;
            }
            kept
        });
        index.total_weight = index.total_weight.saturating_sub(freed);
        before - index.entries.len()
    }

    fn evict_if_over_capacity(&self) {
        if self.total_weight() > self.policy.capacity() {
            self.evict();
        }
    }

    /// Delete idle entries oldest-first until the total fits the capacity
    pub fn evict(&self) -> EvictionReport<P::Key> {
        let capacity = self.policy.capacity();

        let snapshot: Vec<(P::Key, Arc<P::Item>, u64)> = {
            let index = self.index.lock();
            if index.total_weight <= capacity {
                return EvictionReport {
                    total_weight: index.total_weight,
                    ..Default::default()
                };
            }
            index
                .entries
                .iter()
                .map(|(key, slot)| (key.clone(), slot.item.clone(), slot.id))
                .collect()
        };

        // Timestamps may hit the disk, so order outside the lock.
        let mut candidates: Vec<_> = snapshot
            .into_iter()
            .map(|(key, item, id)| (self.policy.timestamp(&item), key, item, id))
            .collect();
        candidates.sort_by_key(|candidate| candidate.0);

        let mut report = EvictionReport::default();
        let mut victims = Vec::new();
        let mut index = self.index.lock();
        for (_, key, item, id) in candidates {
            if index.total_weight <= capacity {
                break;
            }
            if !self.policy.is_idle(&item) {
                continue;
            }
            // Removed or replaced since the snapshot
            if index.entries.get(&key).map(|slot| slot.id) != Some(id) {
                continue;
            }
            if !self.policy.delete(&item) {
                continue;
            }
            if let Some(slot) = index.remove(&key) {
                report.freed_bytes += slot.weight;
            }
            self.stats.increment_evictions();
            report.evicted.push(key);
            victims.push(item);
        }
        report.total_weight = index.total_weight;
        report.over_capacity = index.total_weight > capacity;
        drop(index);

        for victim in &victims {
            self.policy.dispose(victim);
        }

        if report.over_capacity {
            warn!(
                total_weight = report.total_weight,
                capacity = capacity,
                evicted = report.evicted.len(),
                "Cache remains over capacity, no idle entries left to evict"
            );
        } else {
            info!(
                evicted = report.evicted.len(),
                freed_bytes = report.freed_bytes,
                total_weight = report.total_weight,
                capacity = capacity,
                "Cache eviction completed"
            );
        }
        report
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &P::Key) -> bool {
        self.index.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<P::Key> {
        self.index.lock().entries.keys().cloned().collect()
    }

    pub fn total_weight(&self) -> u64 {
        self.index.lock().total_weight
    }

    pub fn start_time(&self) -> SystemTime {
        *self.start_time.lock()
    }

    pub fn set_start_time(&self, time: SystemTime) {
        *self.start_time.lock() = time;
    }

    pub fn stats(&self) -> CacheStats {
        let (size, count) = {
            let index = self.index.lock();
            (index.total_weight, index.entries.len() as u64)
        };
        self.stats.snapshot(size, count, self.policy.capacity())
    }
}
