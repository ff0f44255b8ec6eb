//! Volatile log storage.
//!
//! The log lives entirely in memory: a clean cluster restart starts from an
//! empty log and re-replicates state from scratch. Compaction drops the
//! prefix covered by a snapshot while remembering its index and term so
//! consistency checks keep working across the boundary.

use std::collections::VecDeque;

use crate::message::LogEntry;

#[derive(Debug, Default)]
pub struct LogStore {
    entries: VecDeque<LogEntry>,
    /// Index of the last entry folded into a snapshot (0 = none).
    snapshot_index: u64,
    /// Term of that entry.
    snapshot_term: u64,
}

impl LogStore {
    pub fn new() -> Self {
        LogStore::default()
    }

    /// Index of the last entry, counting compacted ones.
    pub fn last_index(&self) -> u64 {
        self.entries
            .back()
            .map(|e| e.index)
            .unwrap_or(self.snapshot_index)
    }

    /// Term of the last entry, counting compacted ones.
    pub fn last_term(&self) -> u64 {
        self.entries
            .back()
            .map(|e| e.term)
            .unwrap_or(self.snapshot_term)
    }

    /// First index still present in the log proper.
    pub fn first_index(&self) -> u64 {
        self.snapshot_index + 1
    }

    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    /// Term of the entry at `index`, if known. Index 0 is the empty log.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.entry(index).map(|e| e.term)
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index < self.first_index() || index > self.last_index() {
            return None;
        }
        self.entries.get((index - self.first_index()) as usize)
    }

    /// Entries starting at `index`, at most `max`.
    pub fn entries_from(&self, index: u64, max: usize) -> Vec<LogEntry> {
        let mut out = Vec::new();
        let mut i = index.max(self.first_index());
        while i <= self.last_index() && out.len() < max {
            if let Some(entry) = self.entry(i) {
                out.push(entry.clone());
            }
            i += 1;
        }
        out
    }

    pub fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push_back(entry);
    }

    /// Removes every entry with index >= `index` (conflict truncation).
    pub fn truncate_from(&mut self, index: u64) {
        while self
            .entries
            .back()
            .map(|e| e.index >= index)
            .unwrap_or(false)
        {
            self.entries.pop_back();
        }
    }

    /// Drops entries up to and including `index`, recording the snapshot point.
    pub fn compact_to(&mut self, index: u64, term: u64) {
        while self
            .entries
            .front()
            .map(|e| e.index <= index)
            .unwrap_or(false)
        {
            self.entries.pop_front();
        }
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// Resets the whole log to sit just after an installed snapshot.
    pub fn reset_to_snapshot(&mut self, index: u64, term: u64) {
        self.entries.clear();
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
