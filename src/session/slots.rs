//! Bounded admission pool for concurrently running sessions.

use tokio::sync::Mutex;

/// Fixed pool of admission slots.
///
/// `allocate` scans from index 0 for the first free slot. The mutex makes
/// allocation and release atomic across concurrent creation and kill
/// paths, so two sessions can never hold the same index. There is no
/// queueing: an exhausted pool is an immediate failure.
#[derive(Debug)]
pub struct SlotPool {
    capacity: usize,
    slots: Mutex<Vec<bool>>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(vec![false; capacity]),
        }
    }

    /// Claim the lowest free slot, or `None` when the pool is exhausted.
    pub async fn allocate(&self) -> Option<usize> {
        let mut slots = self.slots.lock().await;
        let index = slots.iter().position(|in_use| !in_use)?;
        slots[index] = true;
        Some(index)
    }

    /// Return a slot to the pool. Out-of-range indices are ignored.
    pub async fn release(&self, index: usize) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(index) {
            *slot = false;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn in_use(&self) -> usize {
        self.slots.lock().await.iter().filter(|slot| **slot).count()
    }
}
