use crate::value::{merge_payload, Batch, Payload};
use std::mem;

/// Per-category accumulator of partial patches since the last flush.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    entries: Batch,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-merges `payload` into the entry for `category`. Returns `false` for an empty payload,
    /// which leaves the queue untouched.
    pub fn queue(&mut self, category: &str, payload: Payload) -> bool {
        if payload.is_empty() {
            return false;
        }
        match self.entries.get_mut(category) {
            Some(existing) => merge_payload(existing, payload),
            None => {
                self.entries.insert(category.to_string(), payload);
            }
        }
        true
    }

    /// Hands out the whole queue and leaves an empty one behind, so patches arriving while the
    /// batch is in flight start a fresh queue.
    pub fn take_and_clear(&mut self) -> Batch {
        mem::take(&mut self.entries)
    }

    pub fn get(&self, category: &str) -> Option<&Payload> {
        self.entries.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
