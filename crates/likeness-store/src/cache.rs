//! Generation-counted single-slot memoization.

use crate::store::PersonId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Person id to display name.
pub type IdentityMap = BTreeMap<PersonId, String>;

/// Caches one value tagged with the generation it was built at.
///
/// Writers call [`invalidate`](Self::invalidate) after committing. A read only
/// reuses the cached value when its tag equals the current generation, so a
/// value built before the last invalidation is never served.
#[derive(Debug)]
pub struct GenerationCache<T> {
    generation: AtomicU64,
    slot: Mutex<Option<(u64, Arc<T>)>>,
}

impl<T> Default for GenerationCache<T> {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            slot: Mutex::new(None),
        }
    }
}

impl<T> GenerationCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Bump the generation and drop the cached value. Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.slot.lock() = None;
        next
    }

    /// Return the cached value if current, otherwise rebuild it.
    ///
    /// `rebuild` runs without the slot lock held, so concurrent readers may
    /// rebuild in parallel; the newest tag wins the slot.
    pub fn get_or_rebuild<E>(&self, rebuild: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        let current = self.generation();
        if let Some((tag, value)) = self.slot.lock().as_ref() {
            if *tag == current {
                return Ok(Arc::clone(value));
            }
        }

        let value = Arc::new(rebuild()?);

        let mut slot = self.slot.lock();
        let newer_cached = matches!(slot.as_ref(), Some((tag, _)) if *tag > current);
        if !newer_cached && self.generation() == current {
            *slot = Some((current, Arc::clone(&value)));
        }
        Ok(value)
    }

    /// Generation tag of the cached value, if any.
    pub fn cached_generation(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|(tag, _)| *tag)
    }
}
