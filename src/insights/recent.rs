//! Fixed-capacity ring buffer of the most recent calls

use crate::models::RecentOutput;

/// Circular buffer that overwrites its oldest slot once full.
#[derive(Debug, Clone)]
pub struct RecentOutputsBuffer {
    slots: Vec<Option<RecentOutput>>,
    /// Index of the slot the next push writes to
    next: usize,
    len: usize,
}

impl RecentOutputsBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, entry: RecentOutput) {
        let capacity = self.slots.len();
        self.slots[self.next] = Some(entry);
        self.next = (self.next + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    /// Entries ordered newest first
    pub fn snapshot(&self) -> Vec<RecentOutput> {
        let capacity = self.slots.len();
        (1..=self.len)
            .filter_map(|back| {
                let idx = (self.next + capacity - back) % capacity;
                self.slots[idx].clone()
            })
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
        self.len = 0;
    }
}
