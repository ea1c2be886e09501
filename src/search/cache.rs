//! Aggregated-result cache keyed by `(query, max_results)`.
//!
//! Each key owns a [`OnceCell`], so concurrent lookups for the same key wait
//! on a single population instead of each calling the providers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;
use tracing::debug;

use super::SearchResult;
use crate::config::DEFAULT_CACHE_CAPACITY;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    max_results: usize,
}

struct Entry {
    results: Vec<SearchResult>,
    stored_at: Instant,
}

struct Slot {
    cell: Arc<OnceCell<Entry>>,
    created: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    /// Populated entries past their TTL that have not been evicted yet.
    pub expired: usize,
    pub capacity: usize,
}

pub struct SearchCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    ttl: Option<Duration>,
    capacity: usize,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(None, DEFAULT_CACHE_CAPACITY)
    }
}

impl SearchCache {
    /// `ttl = None` keeps entries until evicted by capacity or [`clear`](Self::clear).
    pub fn new(ttl: Option<Duration>, capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Return the cached results for the key, or run `populate` once and
    /// cache what it returns. Concurrent callers with the same key share
    /// one population.
    pub async fn get_or_populate<F, Fut>(
        &self,
        query: &str,
        max_results: usize,
        populate: F,
    ) -> Vec<SearchResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<SearchResult>>,
    {
        let Some(cell) = self.cell_for(query, max_results) else {
            return populate().await;
        };

        if cell.initialized() {
            debug!(query, max_results, "search cache hit");
        }
        let entry = cell
            .get_or_init(|| async move {
                Entry {
                    results: populate().await,
                    stored_at: Instant::now(),
                }
            })
            .await;
        entry.results.clone()
    }

    /// Fresh cached results, without populating.
    pub fn get(&self, query: &str, max_results: usize) -> Option<Vec<SearchResult>> {
        let key = CacheKey {
            query: query.to_string(),
            max_results,
        };
        let slots = self.lock();
        let entry = slots.get(&key)?.cell.get()?;
        if self.is_expired(entry) {
            return None;
        }
        Some(entry.results.clone())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.lock();
        let expired = slots
            .values()
            .filter_map(|s| s.cell.get())
            .filter(|e| self.is_expired(e))
            .count();
        CacheStats {
            total: slots.len(),
            expired,
            capacity: self.capacity,
        }
    }

    /// The cell for `key`, created if missing or stale. `None` when the
    /// cache has no capacity at all.
    fn cell_for(&self, query: &str, max_results: usize) -> Option<Arc<OnceCell<Entry>>> {
        if self.capacity == 0 {
            return None;
        }
        let key = CacheKey {
            query: query.to_string(),
            max_results,
        };

        let mut slots = self.lock();
        if let Some(slot) = slots.get(&key) {
            match slot.cell.get() {
                Some(entry) if self.is_expired(entry) => {
                    debug!(query, max_results, "search cache entry expired");
                    slots.remove(&key);
                }
                _ => return Some(Arc::clone(&slot.cell)),
            }
        }

        if slots.len() >= self.capacity {
            self.evict(&mut slots);
        }

        let cell = Arc::new(OnceCell::new());
        slots.insert(
            key,
            Slot {
                cell: Arc::clone(&cell),
                created: Instant::now(),
            },
        );
        Some(cell)
    }

    /// Drop expired entries, then the oldest settled ones until there is room
    /// for one more. Slots still being populated are never dropped, so the
    /// map may briefly exceed `capacity`.
    fn evict(&self, slots: &mut HashMap<CacheKey, Slot>) {
        slots.retain(|_, s| s.cell.get().is_none_or(|e| !self.is_expired(e)));
        while slots.len() >= self.capacity {
            let Some(oldest) = slots
                .iter()
                .filter(|(_, s)| s.cell.initialized())
                .min_by_key(|(_, s)| s.created)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            debug!(query = %oldest.query, "evicting search cache entry");
            slots.remove(&oldest);
        }
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() > ttl)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
