use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent accepted measurements.
///
/// Length never exceeds `capacity`; once full, every push evicts the oldest
/// value. Iteration order is insertion order.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SlidingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    /// Create an empty window. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    /// Append a value, returning the evicted one if the window was full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
