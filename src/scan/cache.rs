//! Per-directory metadata cache with fingerprint + age expiry.
//!
//! Each data directory gets its own slot mutex: a caller that misses holds the
//! slot while it rescans, so concurrent callers for the same directory wait and
//! then reuse the fresh value instead of scanning again. Values are handed out
//! as `Arc<T>` and never mutated, so readers cannot observe a torn snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::FusionResult;

struct CacheEntry<T> {
    fingerprint: u64,
    loaded_at: Instant,
    value: Arc<T>,
}

type Slot<T> = Arc<Mutex<Option<CacheEntry<T>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct MetadataCache<T> {
    freshness: Duration,
    slots: Mutex<HashMap<PathBuf, Slot<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> MetadataCache<T> {
    pub fn new(freshness: Duration) -> Self {
        Self { freshness, slots: Mutex::new(HashMap::new()), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    fn slot(&self, dir: &Path) -> Slot<T> {
        self.slots.lock().entry(dir.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
    }

    /// Return the cached value for `dir`, or run `load` and cache its result.
    ///
    /// `fingerprint` is evaluated while holding the directory slot. A cached value
    /// is reused only when its fingerprint matches and it is younger than the
    /// freshness window. Load failures are returned and leave the slot empty.
    pub fn get_or_load<F, L>(&self, dir: &Path, fingerprint: F, load: L) -> FusionResult<Arc<T>>
    where
        F: FnOnce() -> FusionResult<u64>,
        L: FnOnce(u64) -> FusionResult<T>,
    {
        let slot = self.slot(dir);
        let mut guard = slot.lock();
        let fp = fingerprint()?;
        if let Some(entry) = guard.as_ref() {
            if entry.fingerprint == fp && entry.loaded_at.elapsed() < self.freshness {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::tprintln!("metadata cache hit: dir={} fp={:016x}", dir.display(), fp);
                return Ok(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "datafuse::cache",
            "metadata cache miss: dir='{}' fp={:016x} stale_entry={} (hits={}, misses={})",
            dir.display(), fp, guard.is_some(),
            self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed)
        );
        *guard = None;
        let value = Arc::new(load(fp)?);
        *guard = Some(CacheEntry { fingerprint: fp, loaded_at: Instant::now(), value: value.clone() });
        Ok(value)
    }

    /// Drop the cached value for `dir`; the next lookup rescans.
    pub fn invalidate(&self, dir: &Path) {
        let slot = self.slots.lock().get(dir).cloned();
        if let Some(slot) = slot {
            *slot.lock() = None;
            debug!(target: "datafuse::cache", "invalidated '{}'", dir.display());
        }
    }

    pub fn stats(&self) -> CacheStats {
        let slots: Vec<Slot<T>> = self.slots.lock().values().cloned().collect();
        let entries = slots.iter().filter(|s| s.lock().is_some()).count();
        CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed), entries }
    }
}
