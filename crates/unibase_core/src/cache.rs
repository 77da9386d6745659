//! Per-collection count cache.
//!
//! Count results are keyed by a signature of the physical plan that produced
//! them. Every write to a collection clears that collection's entries and the
//! entries of every count that joined it, so a count read after a write never
//! observes the pre-write value. Each collection holds at most `max_size`
//! entries; the oldest entry is evicted first.
//!
//! A count runs between [`QueryCache::get`] and [`QueryCache::set`] without
//! the cache lock held. `get` hands out the clear generation it observed and
//! `set` drops the value if any clear happened since.

use crate::config::Config;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
struct Bucket {
    entries: HashMap<String, u64>,
    order: VecDeque<String>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    /// Joined collection -> collections holding counts that join it.
    dependents: HashMap<String, HashSet<String>>,
    generation: u64,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Cached count.
    Hit(u64),
    /// No entry; pass the generation to [`QueryCache::set`].
    Miss(u64),
}

/// FIFO-bounded cache of count results, partitioned by collection.
#[derive(Debug)]
pub struct QueryCache {
    enabled: bool,
    max_size: usize,
    state: Mutex<State>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    /// Creates a cache.
    pub fn new(enabled: bool, max_size: usize) -> Self {
        Self {
            enabled: enabled && max_size > 0,
            max_size,
            state: Mutex::new(State::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache from `cache_enabled` / `cache_size`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_enabled, config.cache_size)
    }

    /// Whether lookups can hit.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Hex SHA-256 of a plan rendering.
    pub fn signature(plan: &str) -> String {
        format!("{:x}", Sha256::digest(plan.as_bytes()))
    }

    /// Looks up a cached count.
    pub fn get(&self, collection: &str, key: &str) -> CacheLookup {
        let state = self.state.lock();
        if !self.enabled {
            return CacheLookup::Miss(state.generation);
        }
        let hit = state
            .buckets
            .get(collection)
            .and_then(|b| b.entries.get(key).copied());

        match hit {
            Some(count) => {
                debug!(collection, key, "count cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Hit(count)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss(state.generation)
            }
        }
    }

    /// Stores a count computed after a [`CacheLookup::Miss`] at `generation`.
    ///
    /// `joined` names the collections the count read besides `collection`;
    /// clearing any of them drops the entry too. The value is discarded when
    /// a clear happened after `generation` was observed. Past `max_size` the
    /// oldest entries are evicted.
    pub fn set(
        &self,
        collection: &str,
        joined: &[String],
        key: &str,
        value: u64,
        generation: u64,
    ) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(collection, key, "collection written during count, not caching");
            return;
        }
        for table in joined.iter().filter(|t| t.as_str() != collection) {
            state
                .dependents
                .entry(table.clone())
                .or_default()
                .insert(collection.to_string());
        }
        let bucket = state.buckets.entry(collection.to_string()).or_default();

        if bucket.entries.insert(key.to_string(), value).is_some() {
            return;
        }
        bucket.order.push_back(key.to_string());

        while bucket.order.len() > self.max_size {
            if let Some(oldest) = bucket.order.pop_front() {
                debug!(collection, key = %oldest, "count cache full, evicting");
                bucket.entries.remove(&oldest);
            }
        }
    }

    /// Drops every entry of `collection` and of the counts that joined it.
    pub fn clear(&self, collection: &str) {
        let mut state = self.state.lock();
        state.generation += 1;
        let dependents = state.dependents.remove(collection).unwrap_or_default();
        if state.buckets.remove(collection).is_some() {
            debug!(collection, "count cache cleared");
        }
        for dependent in dependents {
            if state.buckets.remove(&dependent).is_some() {
                debug!(collection, dependent = %dependent, "joined count cache cleared");
            }
        }
    }

    /// Number of entries cached for `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.state
            .lock()
            .buckets
            .get(collection)
            .map(|b| b.entries.len())
            .unwrap_or(0)
    }

    /// Total cache hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
