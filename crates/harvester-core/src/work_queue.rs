//! Lock-free work queue for distributing stage tasks across workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue distributing tasks to workers.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next task
/// together with its submission index, so results can be slotted back in
/// submission order.
pub struct WorkQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next task (lock-free)
    pub fn next(&self) -> Option<(usize, &T)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i, item))
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
