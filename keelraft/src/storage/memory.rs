use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::membership::GroupMembers;
use crate::model::Endpoint;
use crate::model::LogEntry;
use crate::model::LogIndex;
use crate::model::SnapshotChunk;
use crate::model::Term;
use crate::storage::RaftStore;
use crate::storage::RestoredSnapshot;
use crate::storage::RestoredState;

/// In-memory [`RaftStore`] with real flush semantics, for tests and
/// examples.
///
/// Writes land in a staging image and only become "durable" when `flush()`
/// copies the staging image over the durable one. [`load`](RaftStore::load)
/// reads the durable image, so cloning a `MemStore`, dropping the node and
/// building a new one from the clone behaves like a crash and restart at the
/// last flush point.
#[derive(Clone)]
pub struct MemStore<O> {
    inner: Arc<Mutex<MemStoreInner<O>>>,
}

struct MemStoreInner<O> {
    staged: StoreImage<O>,
    durable: StoreImage<O>,
    flush_count: u64,
    fail_writes: bool,
}

#[derive(Clone)]
struct StoreImage<O> {
    identity: Option<(Endpoint, GroupMembers)>,
    term: Term,
    voted_for: Option<Endpoint>,
    entries: Vec<LogEntry<O>>,
    snapshots: BTreeMap<LogIndex, SnapshotImage>,
}

#[derive(Clone)]
struct SnapshotImage {
    term: Term,
    chunk_count: u32,
    chunks: BTreeMap<u32, SnapshotChunk>,
}

impl SnapshotImage {
    fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.chunk_count
    }
}

impl<O> Default for StoreImage<O> {
    fn default() -> Self {
        Self {
            identity: None,
            term: 0,
            voted_for: None,
            entries: Vec::new(),
            snapshots: BTreeMap::new(),
        }
    }
}

impl<O: Clone> MemStore<O> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemStoreInner {
                staged: StoreImage::default(),
                durable: StoreImage::default(),
                flush_count: 0,
                fail_writes: false,
            })),
        }
    }

    /// Number of completed flushes, for durability assertions in tests.
    pub fn flush_count(&self) -> u64 {
        self.inner.lock().unwrap().flush_count
    }

    /// Makes every subsequent write and flush fail, simulating a dead disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// The last durable `(term, voted_for)`, for test assertions.
    pub fn durable_term(&self) -> (Term, Option<Endpoint>) {
        let inner = self.inner.lock().unwrap();
        (inner.durable.term, inner.durable.voted_for.clone())
    }
}

impl<O: Clone> Default for MemStore<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> MemStoreInner<O> {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            Err(StoreError::new("injected write failure"))
        } else {
            Ok(())
        }
    }
}

impl<O: Clone + Send + 'static> RaftStore<O> for MemStore<O> {
    fn open(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn load(&mut self) -> Result<Option<RestoredState<O>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let image = &inner.durable;

        let (local, initial_members) = match &image.identity {
            Some((local, initial)) => (local.clone(), initial.clone()),
            None => return Ok(None),
        };

        // The newest complete snapshot wins; incomplete ones are ignored.
        let snapshot = image
            .snapshots
            .iter()
            .rev()
            .find(|(_, s)| s.is_complete())
            .map(|(index, s)| {
                let chunks: Vec<SnapshotChunk> = s.chunks.values().cloned().collect();
                let group_members = chunks[0].group_members.clone();
                RestoredSnapshot {
                    index: *index,
                    term: s.term,
                    group_members,
                    chunks,
                }
            });

        let snapshot_index = snapshot.as_ref().map(|s| s.index).unwrap_or(0);
        let entries: Vec<LogEntry<O>> = image
            .entries
            .iter()
            .filter(|e| e.index > snapshot_index)
            .cloned()
            .collect();

        Ok(Some(RestoredState {
            local,
            initial_members,
            term: image.term,
            voted_for: image.voted_for.clone(),
            snapshot,
            entries,
        }))
    }

    fn persist_initial_members(
        &mut self,
        local: &Endpoint,
        initial: &GroupMembers,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        let identity = Some((local.clone(), initial.clone()));
        inner.staged.identity = identity.clone();
        // Durable on return, independent of flush().
        inner.durable.identity = identity;
        Ok(())
    }

    fn persist_term(&mut self, term: Term, voted_for: Option<&Endpoint>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        inner.staged.term = term;
        inner.staged.voted_for = voted_for.cloned();
        Ok(())
    }

    fn persist_log_entry(&mut self, entry: &LogEntry<O>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        inner.staged.entries.push(entry.clone());
        Ok(())
    }

    fn persist_snapshot_chunk(&mut self, chunk: &SnapshotChunk) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        let image = inner
            .staged
            .snapshots
            .entry(chunk.snapshot_index)
            .or_insert_with(|| SnapshotImage {
                term: chunk.snapshot_term,
                chunk_count: chunk.chunk_count,
                chunks: BTreeMap::new(),
            });
        image.chunks.insert(chunk.chunk_index, chunk.clone());
        Ok(())
    }

    fn truncate_log_entries_from(&mut self, log_index: LogIndex) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        inner.staged.entries.retain(|e| e.index < log_index);
        Ok(())
    }

    fn truncate_snapshot_chunks_until(&mut self, log_index: LogIndex) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;
        let staged = &mut inner.staged;
        let keep: Vec<LogIndex> = staged
            .snapshots
            .iter()
            .filter(|(index, s)| **index > log_index || s.is_complete())
            .map(|(index, _)| *index)
            .collect();
        staged.snapshots.retain(|index, _| keep.contains(index));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_writable()?;

        // A complete flushed snapshot supersedes covered entries and older
        // snapshots; evict them from the staging image first.
        let newest_complete = inner
            .staged
            .snapshots
            .iter()
            .rev()
            .find(|(_, s)| s.is_complete())
            .map(|(index, _)| *index);
        if let Some(snapshot_index) = newest_complete {
            let staged = &mut inner.staged;
            staged.entries.retain(|e| e.index > snapshot_index);
            staged
                .snapshots
                .retain(|index, s| *index == snapshot_index || (*index > snapshot_index && !s.is_complete()));
        }

        inner.durable = inner.staged.clone();
        inner.flush_count += 1;
        Ok(())
    }
}
