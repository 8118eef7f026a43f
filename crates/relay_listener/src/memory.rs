//! In-memory push adapter.

use crate::adapter::PushAdapter;
use crate::error::{ListenerError, ListenerResult};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use relay_protocol::Cursor;
use std::collections::HashMap;
use std::sync::Arc;

type EventValidator = dyn Fn(&str) -> Result<(), String> + Send + Sync;

#[derive(Debug, Default)]
struct MemoryState {
    /// Stream name -> serialized cursor.
    offsets: HashMap<String, String>,
    /// Applied events in commit order.
    events: Vec<String>,
    commits: u64,
    /// Fail the next transaction once it has applied this many events.
    fail_after_events: Option<usize>,
}

/// Open transaction of a [`MemoryAdapter`].
///
/// Holds the adapter's lock for its whole lifetime, so transactions are
/// serialized. Writes are staged and only reach the shared state on commit.
pub struct MemoryTransaction {
    state: ArcMutexGuard<RawMutex, MemoryState>,
    staged_offsets: HashMap<String, String>,
    staged_events: Vec<String>,
}

/// A push adapter keeping offsets and applied events in memory.
///
/// Used by tests and as the reference adapter implementation.
pub struct MemoryAdapter {
    state: Arc<Mutex<MemoryState>>,
    validator: Option<Box<EventValidator>>,
}

impl MemoryAdapter {
    /// Creates an empty adapter that accepts every event.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            validator: None,
        }
    }

    /// Rejects events for which `validator` returns an error.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Makes the next transaction fail with a storage error when it tries
    /// to apply more than `events` events.
    pub fn inject_storage_failure(&self, events: usize) {
        self.state.lock().fail_after_events = Some(events);
    }

    /// Committed cursor for `stream`.
    pub fn offset(&self, stream: &str) -> Option<Cursor> {
        self.state
            .lock()
            .offsets
            .get(stream)
            .and_then(|raw| Cursor::parse(raw).ok())
    }

    /// Stores a cursor outside of any push, e.g. to seed a test.
    pub fn seed_offset(&self, cursor: &Cursor) {
        self.state
            .lock()
            .offsets
            .insert(cursor.stream().to_string(), cursor.serialize());
    }

    /// Committed events in order.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> u64 {
        self.state.lock().commits
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PushAdapter for MemoryAdapter {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> ListenerResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            state: self.state.lock_arc(),
            staged_offsets: HashMap::new(),
            staged_events: Vec::new(),
        })
    }

    fn commit(&self, mut tx: MemoryTransaction) -> ListenerResult<()> {
        let staged_offsets = std::mem::take(&mut tx.staged_offsets);
        let staged_events = std::mem::take(&mut tx.staged_events);

        tx.state.offsets.extend(staged_offsets);
        tx.state.events.extend(staged_events);
        tx.state.commits += 1;
        Ok(())
    }

    fn rollback(&self, tx: MemoryTransaction) {
        drop(tx);
    }

    fn get_offset(
        &self,
        stream: &str,
        tx: &mut MemoryTransaction,
    ) -> ListenerResult<Option<Cursor>> {
        let raw = tx
            .staged_offsets
            .get(stream)
            .or_else(|| tx.state.offsets.get(stream));

        match raw {
            Some(raw) => Cursor::parse(raw)
                .map(Some)
                .map_err(|source| ListenerError::CorruptOffset {
                    stream: stream.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set_offset(
        &self,
        stream: &str,
        cursor: &Cursor,
        tx: &mut MemoryTransaction,
    ) -> ListenerResult<()> {
        tx.staged_offsets
            .insert(stream.to_string(), cursor.serialize());
        Ok(())
    }

    fn apply_event(&self, content: &str, tx: &mut MemoryTransaction) -> ListenerResult<()> {
        if let Some(limit) = tx.state.fail_after_events {
            if tx.staged_events.len() >= limit {
                tx.state.fail_after_events = None;
                return Err(ListenerError::Storage(format!(
                    "injected failure after {} events",
                    limit
                )));
            }
        }

        if let Some(validator) = &self.validator {
            validator(content).map_err(ListenerError::Event)?;
        }

        tx.staged_events.push(content.to_string());
        Ok(())
    }
}
