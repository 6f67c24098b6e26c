//! Bounded per-session output history.

use std::collections::VecDeque;

/// Default number of chunks retained per session.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Ring of output chunks; the oldest chunk is evicted once full.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: VecDeque<Vec<u8>>,
    capacity: usize,
    evicted: u64,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OutputBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
            self.evicted += 1;
        }
        self.chunks.push_back(chunk);
    }

    /// Copy of the retained chunks, oldest first.
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks dropped so far to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Total bytes currently retained.
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}
