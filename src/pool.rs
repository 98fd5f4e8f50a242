//! The bounded, LRU-ordered cache of open [`Segment`] handles.
//!
//! A segment is only evictable when it is not currently borrowed by an
//! in-flight operation. We detect this with `Arc::strong_count`, the same
//! way the earlier C++ revision of this design checked `shared_ptr::use_count`:
//! a count of exactly one means only the pool itself holds a reference.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::segment::Segment;

/// Number of victims inspected per eviction pass, matching the source design.
const EVICTION_BATCH: usize = 8;

/// Back-off between eviction passes that found nothing to evict.
const EVICTION_BACKOFF: Duration = Duration::from_micros(50);

struct Inner {
    /// segment start offset -> handle.
    map: HashMap<u64, Arc<Segment>>,
    /// Access order, oldest at the front, most-recently-used at the back.
    /// Invariant: `lru`'s element set equals `map`'s key set, each exactly once.
    lru: Vec<u64>,
}

/// Bounded cache of open [`Segment`] handles, keyed by segment start offset.
pub(crate) struct Pool {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Pool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                lru: Vec::new(),
            }),
        }
    }

    /// Current number of pooled handles. For tests and invariant checks.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Resolve the segment starting at `start`, opening it via `open` if it
    /// is not already pooled. Moves the touched segment to the tail of the
    /// LRU list. May evict other handles to stay within capacity.
    pub(crate) fn get_or_open(
        &self,
        start: u64,
        open: impl FnOnce() -> io::Result<Segment>,
    ) -> io::Result<Arc<Segment>> {
        let mut guard = self.inner.lock();
        if let Some(seg) = guard.map.get(&start).cloned() {
            touch(&mut guard.lru, start);
            return Ok(seg);
        }

        Self::evict_if_full(&mut guard, self.capacity);

        // Open the new segment without holding the lock: opening is a
        // syscall and must not block other pool operations.
        drop(guard);
        let seg = Arc::new(open()?);
        let mut guard = self.inner.lock();
        // Another thread may have raced us to open the same segment while we
        // were unlocked; prefer the winner already installed, so every
        // segment start maps to a single handle.
        if let Some(existing) = guard.map.get(&start).cloned() {
            touch(&mut guard.lru, start);
            return Ok(existing);
        }

        // Other threads opening distinct new segments may have each evicted
        // while we were unlocked above, without yet inserting; the pool can
        // be back at or over capacity by the time we get here. Re-evict
        // inside this same locked section so the insert below never lands
        // while `map.len() >= capacity`.
        Self::evict_if_full(&mut guard, self.capacity);

        guard.map.insert(start, seg.clone());
        guard.lru.push(start);
        Ok(seg)
    }

    /// Drop the handle for `start` from the pool, if present, regardless of
    /// whether it is currently borrowed. Used by truncate, which unlinks the
    /// underlying file out from under any pooled handle.
    pub(crate) fn evict(&self, start: u64) {
        let mut guard = self.inner.lock();
        guard.map.remove(&start);
        guard.lru.retain(|&s| s != start);
    }

    /// Fsync every currently pooled segment. Segments present on disk but
    /// not currently pooled are left untouched.
    pub(crate) fn sync_all(&self) -> io::Result<()> {
        let segments: Vec<Arc<Segment>> = {
            let guard = self.inner.lock();
            guard.map.values().cloned().collect()
        };
        for seg in segments {
            seg.sync()?;
        }
        Ok(())
    }

    /// Evict handles until `|pool| < capacity`, selecting up to
    /// `EVICTION_BATCH` victims per pass and skipping any still borrowed.
    /// Blocks (sleeping briefly between passes, without holding the lock)
    /// until at least one handle becomes evictable.
    fn evict_if_full(guard: &mut parking_lot::MutexGuard<'_, Inner>, capacity: usize) {
        loop {
            if guard.map.len() < capacity {
                return;
            }

            // Scan the whole LRU list looking for up to EVICTION_BATCH
            // evictable victims: the batch size bounds how many are
            // *selected* per pass, not how many positions are *examined*.
            // Stopping after the first 8 positions would spin forever once
            // the pool holds more than 8 entries and the oldest few happen
            // to be borrowed, even if plenty of younger entries are free.
            let mut victims: Vec<u64> = Vec::with_capacity(EVICTION_BATCH);
            for &start in guard.lru.iter() {
                if victims.len() >= EVICTION_BATCH {
                    break;
                }
                // A handle is evictable only when the pool holds the sole
                // remaining reference: no in-flight operation has a lease.
                let evictable = guard.map.get(&start).map(|seg| Arc::strong_count(seg) == 1).unwrap_or(false);
                if evictable {
                    victims.push(start);
                }
            }

            if !victims.is_empty() {
                for start in &victims {
                    guard.map.remove(start);
                }
                guard.lru.retain(|s| !victims.contains(s));
                return;
            }

            // Nothing was evictable this pass: release the lock briefly and
            // retry, so a borrower elsewhere gets a chance to finish and drop
            // its reference.
            parking_lot::MutexGuard::unlocked(guard, || {
                std::thread::sleep(EVICTION_BACKOFF);
            });
        }
    }
}

fn touch(lru: &mut Vec<u64>, start: u64) {
    if let Some(pos) = lru.iter().position(|&s| s == start) {
        lru.remove(pos);
    }
    lru.push(start);
}
