//! Bounded buffer of recent bars held for backfill

use std::collections::VecDeque;

use crate::domain::Bar;

/// Bounded FIFO of the most recent bars, used to seed the remote service on
/// the first live transition
#[derive(Debug, Clone)]
pub struct HistoricalBuffer {
    capacity: usize,
    bars: VecDeque<Bar>,
    total_inserted: u64,
}

impl HistoricalBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
            total_inserted: 0,
        }
    }

    /// Append a bar, evicting the oldest when full
    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        self.total_inserted += 1;
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_inserted(&self) -> u64 {
        self.total_inserted
    }

    pub fn evicted(&self) -> u64 {
        self.total_inserted - self.bars.len() as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    /// Take every buffered bar, oldest first
    pub fn drain(&mut self) -> Vec<Bar> {
        self.bars.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }
}

impl Default for HistoricalBuffer {
    fn default() -> Self {
        Self::new(200)
    }
}
