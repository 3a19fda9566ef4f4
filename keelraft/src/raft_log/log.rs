use std::fmt;

use crate::membership::GroupMembers;
use crate::model::LogEntry;
use crate::model::LogIndex;
use crate::model::SnapshotChunk;
use crate::model::Term;

/// The latest complete snapshot held by a node.
///
/// Chunks are kept in memory (ordered by chunk index) so a leader can serve
/// them to lagging followers without going back to the store.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub index: LogIndex,
    pub term: Term,
    pub group_members: GroupMembers,
    pub chunks: Vec<SnapshotChunk>,
}

/// The in-memory log window: the last snapshot plus a contiguous suffix of
/// regular entries.
///
/// Index arithmetic is O(1): entry `i` lives at `i - first_index()` in the
/// backing vector. Entry terms are non-decreasing in the index.
pub struct RaftLog<O> {
    snapshot: Option<SnapshotRecord>,
    entries: Vec<LogEntry<O>>,
}

impl<O> RaftLog<O> {
    pub fn new() -> Self {
        Self {
            snapshot: None,
            entries: Vec::new(),
        }
    }

    /// Rebuilds the window from restored state. Entries at or below the
    /// snapshot index are discarded; the rest must be contiguous from
    /// `snapshot_index + 1`.
    pub fn restore(snapshot: Option<SnapshotRecord>, entries: Vec<LogEntry<O>>) -> Self {
        let mut log = Self {
            snapshot,
            entries: Vec::new(),
        };
        let first = log.first_index();
        for entry in entries {
            if entry.index < first {
                continue;
            }
            debug_assert_eq!(entry.index, log.last_index() + 1);
            log.entries.push(entry);
        }
        log
    }

    pub fn snapshot(&self) -> Option<&SnapshotRecord> {
        self.snapshot.as_ref()
    }

    /// Index of the last snapshot, or 0 if none was taken yet.
    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot.as_ref().map(|s| s.index).unwrap_or(0)
    }

    pub fn snapshot_term(&self) -> Term {
        self.snapshot.as_ref().map(|s| s.term).unwrap_or(0)
    }

    /// Index of the first regular entry in the window.
    pub fn first_index(&self) -> LogIndex {
        self.snapshot_index() + 1
    }

    pub fn last_index(&self) -> LogIndex {
        match self.entries.last() {
            Some(e) => e.index,
            None => self.snapshot_index(),
        }
    }

    pub fn last_term(&self) -> Term {
        match self.entries.last() {
            Some(e) => e.term,
            None => self.snapshot_term(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry at `index`, or `None` if it is outside the window
    /// (covered by the snapshot, or not appended yet).
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry<O>> {
        if index < self.first_index() || index > self.last_index() {
            return None;
        }
        self.entries.get((index - self.first_index()) as usize)
    }

    /// Term of the entry at `index`. Unlike [`get`](Self::get) this also
    /// answers for the snapshot boundary and for index 0.
    pub fn term_of(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        if index == self.snapshot_index() {
            return Some(self.snapshot_term());
        }
        self.get(index).map(|e| e.term)
    }

    /// Up to `max` entries starting at `from`.
    pub fn entries_from(&self, from: LogIndex, max: usize) -> &[LogEntry<O>] {
        if from < self.first_index() || from > self.last_index() {
            return &[];
        }
        let start = (from - self.first_index()) as usize;
        let end = usize::min(start + max, self.entries.len());
        &self.entries[start..end]
    }

    /// Appends one entry. It must follow the current last index, and its
    /// term must not regress.
    pub fn append(&mut self, entry: LogEntry<O>) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        debug_assert!(entry.term >= self.last_term());
        self.entries.push(entry);
    }

    /// Removes and returns `[index ..= last_index]`. The caller is
    /// responsible for never truncating committed entries.
    pub fn truncate_from(&mut self, index: LogIndex) -> Vec<LogEntry<O>> {
        if index > self.last_index() {
            return Vec::new();
        }
        debug_assert!(index >= self.first_index());
        let start = (index.max(self.first_index()) - self.first_index()) as usize;
        self.entries.split_off(start)
    }

    /// Installs a snapshot as the new window floor.
    ///
    /// Entries at or below the snapshot index are dropped. Entries above it
    /// are retained only when the log demonstrably agrees with the snapshot
    /// (it holds the entry at the snapshot index with the snapshot's term);
    /// otherwise the whole suffix is discarded.
    pub fn install_snapshot(&mut self, snapshot: SnapshotRecord) {
        let retain_suffix = match self.term_of(snapshot.index) {
            Some(term) => term == snapshot.term,
            None => false,
        };

        if retain_suffix && snapshot.index < self.last_index() {
            let keep_from = (snapshot.index + 1).max(self.first_index());
            let start = (keep_from - self.first_index()) as usize;
            self.entries.drain(..start);
        } else {
            self.entries.clear();
        }

        self.snapshot = Some(snapshot);
    }
}

impl<O> Default for RaftLog<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> fmt::Display for RaftLog<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log[{}..{}] snapshot at {}-{}",
            self.first_index(),
            self.last_index(),
            self.snapshot_term(),
            self.snapshot_index()
        )
    }
}
