//! Process-wide unique identifiers.
//!
//! Task nodes, scene objects and geometries are told apart by a `u64` drawn
//! from a single counter. The counter is the only global mutable state in
//! the crate; it is an atomic so that graphs built on different threads
//! never hand out the same id.

use std::sync::atomic::{AtomicU64, Ordering};

static GLOBAL: UniqueIdService = UniqueIdService::new();

/// Monotonic id allocator.
///
/// Most code goes through [`UniqueIdService::global`]. Tests that need
/// predictable ids construct their own instance instead of resetting the
/// global one, which other tests may be drawing from concurrently.
#[derive(Debug)]
pub struct UniqueIdService {
    next: AtomicU64,
}

impl UniqueIdService {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// The shared, process-wide allocator.
    pub fn global() -> &'static UniqueIdService {
        &GLOBAL
    }

    /// Restart the counter at `start`. Ids handed out earlier may be reissued.
    pub fn initialize(&self, start: u64) {
        self.next.store(start, Ordering::SeqCst);
    }

    /// Equivalent to `initialize(1)`.
    pub fn reset(&self) {
        self.initialize(1);
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id that the next call to [`Self::next`] will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for UniqueIdService {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw a fresh id from the global allocator.
pub(crate) fn next_id() -> u64 {
    UniqueIdService::global().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_sequential() {
        let ids = UniqueIdService::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.peek(), 3);
    }

    #[test]
    fn test_reset_restarts_counter() {
        let ids = UniqueIdService::new();
        ids.next();
        ids.next();
        ids.reset();
        assert_eq!(ids.next(), 1);

        ids.initialize(100);
        assert_eq!(ids.next(), 100);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        use rayon::prelude::*;

        let ids = UniqueIdService::new();
        let drawn: Vec<u64> = (0..10_000).into_par_iter().map(|_| ids.next()).collect();
        let unique: HashSet<u64> = drawn.iter().copied().collect();
        assert_eq!(unique.len(), drawn.len());
    }
}
