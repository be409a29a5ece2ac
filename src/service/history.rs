//! Bounded command history

use animatronic_shared::AnimatronicCommand;
use std::collections::VecDeque;

/// Ring buffer of command records; the oldest record is evicted first
#[derive(Debug)]
pub struct CommandHistory {
    capacity: usize,
    records: VecDeque<AnimatronicCommand>,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append a record, returning the one evicted to make room
    pub fn push(&mut self, record: AnimatronicCommand) -> Option<AnimatronicCommand> {
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&AnimatronicCommand> {
        self.records.iter().rev().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AnimatronicCommand> {
        self.records.iter_mut().rev().find(|r| r.id == id)
    }

    /// Up to `limit` records, newest first
    pub fn recent(&self, limit: usize) -> Vec<AnimatronicCommand> {
        let mut out: Vec<_> = self.records.iter().cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        out
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
