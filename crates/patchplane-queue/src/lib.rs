// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic bounded priority queue shared by the Sequential Workflow Engine
//! and the Unified Processor.
//!
//! Both components need the same shape: admit a typed payload under a
//! priority, dequeue highest-priority-first with FIFO tie-break, and report
//! capacity/occupancy statistics. Rather than duplicate the queue for each
//! caller, [`PriorityQueue<T>`] is generic over the payload; the workflow
//! engine instantiates it with a `SequentialRequest` and the processor with
//! a `ProcessorRequest`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use patchplane_core::Priority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Errors returned by [`PriorityQueue`] operations.
#[derive(Debug)]
pub enum QueueError {
    /// The queue has reached its maximum capacity.
    Full {
        /// Maximum number of items the queue can hold.
        max: usize,
    },
    /// An entry with the given ID is already enqueued.
    DuplicateId(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { max } => write!(f, "queue is full (max {max})"),
            Self::DuplicateId(id) => write!(f, "duplicate queue entry: {id}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Snapshot statistics for a [`PriorityQueue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of items currently in the queue.
    pub total: usize,
    /// Maximum queue capacity.
    pub max: usize,
    /// Breakdown of items per priority level.
    pub by_priority: BTreeMap<String, usize>,
}

/// A single entry in the queue: an identity, a priority, and a payload.
#[derive(Clone, Debug)]
pub struct QueueEntry<T> {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// The enqueued payload.
    pub item: T,
}

/// A bounded, priority-aware queue.
///
/// [`dequeue`](PriorityQueue::dequeue) returns the highest-priority entry
/// first; among entries of equal priority, the entry enqueued earliest
/// (FIFO) is returned — entries are stored in insertion order and a
/// stable linear scan for the max priority naturally preserves that tie
/// break.
pub struct PriorityQueue<T> {
    entries: Vec<QueueEntry<T>>,
    max_size: usize,
}

impl<T> PriorityQueue<T> {
    /// Create a new queue with the given maximum capacity.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    /// Add an entry to the queue. Returns an error if the queue is full or
    /// the ID already exists.
    pub fn enqueue(&mut self, id: impl Into<String>, priority: Priority, item: T) -> Result<(), QueueError> {
        if self.entries.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }
        let id = id.into();
        if self.entries.iter().any(|e| e.id == id) {
            return Err(QueueError::DuplicateId(id));
        }
        self.entries.push(QueueEntry { id, priority, item });
        Ok(())
    }

    /// Remove and return the highest-priority entry (FIFO within the same
    /// priority level).
    pub fn dequeue(&mut self) -> Option<QueueEntry<T>> {
        let max_pri = self.entries.iter().map(|e| e.priority).max()?;
        let idx = self.entries.iter().position(|e| e.priority == max_pri)?;
        Some(self.entries.remove(idx))
    }

    /// Peek at the next entry that would be dequeued without removing it.
    pub fn peek(&self) -> Option<&QueueEntry<T>> {
        let max_pri = self.entries.iter().map(|e| e.priority).max()?;
        self.entries.iter().find(|e| e.priority == max_pri)
    }

    /// Return the number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if the queue contains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return `true` if the queue has reached its maximum capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Remove a specific entry by ID, returning it if found.
    pub fn remove(&mut self, id: &str) -> Option<QueueEntry<T>> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove all entries from the queue.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Return references to all entries matching the given priority.
    pub fn by_priority(&self, priority: Priority) -> Vec<&QueueEntry<T>> {
        self.entries.iter().filter(|e| e.priority == priority).collect()
    }

    /// Return a snapshot of queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let mut by_priority = BTreeMap::new();
        for entry in &self.entries {
            let key = match entry.priority {
                Priority::Low => "low",
                Priority::Normal => "normal",
                Priority::High => "high",
                Priority::Critical => "critical",
            };
            *by_priority.entry(key.to_string()).or_insert(0usize) += 1;
        }
        QueueStats {
            total: self.entries.len(),
            max: self.max_size,
            by_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_returns_highest_priority_first() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::Low, 1).unwrap();
        q.enqueue("b", Priority::Critical, 2).unwrap();
        q.enqueue("c", Priority::Normal, 3).unwrap();
        let first = q.dequeue().unwrap();
        assert_eq!(first.id, "b");
    }

    #[test]
    fn dequeue_is_fifo_within_same_priority() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::Normal, 1).unwrap();
        q.enqueue("b", Priority::Normal, 2).unwrap();
        q.enqueue("c", Priority::Normal, 3).unwrap();
        assert_eq!(q.dequeue().unwrap().id, "a");
        assert_eq!(q.dequeue().unwrap().id, "b");
        assert_eq!(q.dequeue().unwrap().id, "c");
    }

    #[test]
    fn enqueue_rejects_duplicate_id() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::Normal, 1).unwrap();
        let err = q.enqueue("a", Priority::Normal, 2).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let mut q: PriorityQueue<i32> = PriorityQueue::new(1);
        q.enqueue("a", Priority::Normal, 1).unwrap();
        let err = q.enqueue("b", Priority::Normal, 2).unwrap_err();
        assert!(matches!(err, QueueError::Full { max: 1 }));
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::High, 1).unwrap();
        assert_eq!(q.peek().unwrap().id, "a");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_by_id() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::Normal, 1).unwrap();
        q.enqueue("b", Priority::Normal, 2).unwrap();
        let removed = q.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(q.len(), 1);
        assert!(q.remove("nonexistent").is_none());
    }

    #[test]
    fn stats_breaks_down_by_priority() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::Low, 1).unwrap();
        q.enqueue("b", Priority::Low, 2).unwrap();
        q.enqueue("c", Priority::Critical, 3).unwrap();
        let stats = q.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.max, 10);
        assert_eq!(stats.by_priority["low"], 2);
        assert_eq!(stats.by_priority["critical"], 1);
    }

    #[test]
    fn empty_queue_dequeue_and_peek_are_none() {
        let mut q: PriorityQueue<i32> = PriorityQueue::new(5);
        assert!(q.is_empty());
        assert!(q.dequeue().is_none());
        assert!(q.peek().is_none());
    }

    #[test]
    fn clear_empties_queue() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::Normal, 1).unwrap();
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn by_priority_filters_correctly() {
        let mut q = PriorityQueue::new(10);
        q.enqueue("a", Priority::High, 1).unwrap();
        q.enqueue("b", Priority::Low, 2).unwrap();
        q.enqueue("c", Priority::High, 3).unwrap();
        assert_eq!(q.by_priority(Priority::High).len(), 2);
        assert_eq!(q.by_priority(Priority::Low).len(), 1);
    }

    #[test]
    fn is_full_reflects_capacity() {
        let mut q = PriorityQueue::new(2);
        assert!(!q.is_full());
        q.enqueue("a", Priority::Normal, 1).unwrap();
        q.enqueue("b", Priority::Normal, 2).unwrap();
        assert!(q.is_full());
    }
}
