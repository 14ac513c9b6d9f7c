use crossbeam_queue::ArrayQueue;

/// Something a pool can hand out repeatedly. `reset` runs on *acquisition*, not
/// just on release: an element that never made it back to the pool must not
/// corrupt the next borrower.
pub trait Poolable: Default {
    fn reset(&mut self);
}

/// A bounded, lock-free free-list. Not a correctness requirement: callers
/// that skip pooling entirely and always construct fresh elements get
/// identical behavior, just more allocation.
pub struct Pool<T: Poolable> {
    free: ArrayQueue<T>,
}

impl<T: Poolable> Pool<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            free: ArrayQueue::new(cap.max(1)),
        }
    }

    pub fn acquire(&self) -> T {
        let mut item = self.free.pop().unwrap_or_default();
        item.reset();
        item
    }

    /// Returns the element to the pool, or drops it if the pool is at capacity.
    pub fn release(&self, item: T) {
        let _ = self.free.push(item);
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}
