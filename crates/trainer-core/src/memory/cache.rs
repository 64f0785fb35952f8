//! Resolved-address cache
//!
//! Remembers the final address of every offset chain walked during the current
//! session incarnation, so repeated reads skip the pointer chase.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::OffsetChain;

#[derive(Debug, Default)]
struct CacheInner {
    generation: u64,
    entries: HashMap<OffsetChain, u64>,
}

/// Thread-safe map from offset chain to its last resolved address.
///
/// A single lock guards the whole map. Every [`invalidate_all`](Self::invalidate_all)
/// bumps a generation counter; stores computed against an older generation are
/// rejected, so a walk that raced an invalidation cannot reinsert a stale address.
#[derive(Debug, Default)]
pub struct AddressCache {
    inner: Mutex<CacheInner>,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current generation; capture it before walking a chain and pass it to `store`.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn resolve(&self, chain: &OffsetChain) -> Option<u64> {
        self.lock().entries.get(chain).copied()
    }

    /// Store a resolved address. Returns `false` when the cache was invalidated
    /// after `generation` was captured.
    pub fn store(&self, chain: &OffsetChain, address: u64, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.entries.insert(chain.clone(), address);
        true
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        inner.generation = inner.generation.wrapping_add(1);
        if !inner.entries.is_empty() {
            debug!("Invalidating {} cached addresses", inner.entries.len());
        }
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
