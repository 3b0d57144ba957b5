//! Bounded top-k heap.
//!
//! Keeps the `capacity` highest-scoring documents seen so far. The root is
//! the weakest admitted score, which is the pruning threshold for WAND.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{Label, TableId};

/// Scored document held in the heap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub id: TableId,
    pub score: f32,
}

impl Eq for ScoredDoc {}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredDoc {
    // Reversed so that `BinaryHeap` pops the lowest score first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Fixed-capacity min-heap keyed by score
#[derive(Debug, Clone)]
pub struct MaxMinHeap {
    capacity: usize,
    heap: BinaryHeap<ScoredDoc>,
}

impl MaxMinHeap {
    pub fn new(capacity: usize) -> Self {
        Self::with_reserve(capacity, capacity)
    }

    /// A heap bounded by `capacity` that preallocates at most `reserve` slots.
    /// Callers pass the number of documents that can ever be admitted.
    pub fn with_reserve(capacity: usize, reserve: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(reserve)),
        }
    }

    /// Admit `id` if the heap has room or `score` beats the weakest entry.
    #[inline]
    pub fn push(&mut self, id: TableId, score: f32) {
        if self.heap.len() < self.capacity {
            self.heap.push(ScoredDoc { id, score });
        } else if let Some(mut top) = self.heap.peek_mut() {
            if score > top.score {
                *top = ScoredDoc { id, score };
            }
        }
    }

    /// Weakest admitted entry.
    #[inline]
    pub fn top(&self) -> Option<&ScoredDoc> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Option<ScoredDoc> {
        self.heap.pop()
    }

    #[inline]
    pub fn full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drain weakest-first into the output slots back to front, leaving them
    /// ordered by descending score. Slots past `len()` are left untouched.
    pub fn drain_into(mut self, distances: &mut [f32], labels: &mut [Label]) {
        let count = self.heap.len().min(distances.len()).min(labels.len());
        while self.heap.len() > count {
            self.heap.pop();
        }
        for slot in (0..count).rev() {
            if let Some(doc) = self.heap.pop() {
                labels[slot] = doc.id as Label;
                distances[slot] = doc.score;
            }
        }
    }
}
