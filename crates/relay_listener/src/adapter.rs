//! Storage adapter seam.
//!
//! A [`PushAdapter`] bridges the listener to the receiver's own storage.
//! All of its operations take an explicit transaction handle obtained from
//! [`PushAdapter::begin`]; the listener holds that handle in a
//! [`TransactionScope`], which commits only when asked to and rolls back on
//! every other exit path, including early returns and panics.

use crate::error::{ListenerError, ListenerResult};
use relay_protocol::Cursor;
use tracing::debug;

/// Capabilities the listener needs from the receiver's storage.
///
/// Offsets and events written through a transaction become visible only
/// when it commits. A transaction handed to [`rollback`](Self::rollback),
/// or to a [`commit`](Self::commit) that fails, must leave no trace.
pub trait PushAdapter: Send + Sync {
    /// Transaction handle.
    type Transaction;

    /// Starts a transaction.
    fn begin(&self) -> ListenerResult<Self::Transaction>;

    /// Commits a transaction.
    fn commit(&self, tx: Self::Transaction) -> ListenerResult<()>;

    /// Discards a transaction.
    fn rollback(&self, tx: Self::Transaction);

    /// Stored cursor for `stream`, if any.
    fn get_offset(&self, stream: &str, tx: &mut Self::Transaction)
        -> ListenerResult<Option<Cursor>>;

    /// Stores the cursor for `stream`.
    fn set_offset(
        &self,
        stream: &str,
        cursor: &Cursor,
        tx: &mut Self::Transaction,
    ) -> ListenerResult<()>;

    /// Applies one event to the receiver's state.
    fn apply_event(&self, content: &str, tx: &mut Self::Transaction) -> ListenerResult<()>;

    /// Runs `body` in a transaction, committing only if it succeeds.
    fn wrap_transaction<T, F>(&self, body: F) -> ListenerResult<T>
    where
        Self: Sized,
        F: FnOnce(&mut TransactionScope<'_, Self>) -> ListenerResult<T>,
    {
        let mut scope = TransactionScope::begin(self)?;
        let value = body(&mut scope)?;
        scope.commit()?;
        Ok(value)
    }
}

/// An open transaction that rolls back unless committed.
pub struct TransactionScope<'a, A: PushAdapter> {
    adapter: &'a A,
    tx: Option<A::Transaction>,
}

impl<'a, A: PushAdapter> TransactionScope<'a, A> {
    /// Begins a transaction on `adapter`.
    pub fn begin(adapter: &'a A) -> ListenerResult<Self> {
        let tx = adapter.begin()?;
        Ok(Self {
            adapter,
            tx: Some(tx),
        })
    }

    fn tx(&mut self) -> ListenerResult<&mut A::Transaction> {
        self.tx
            .as_mut()
            .ok_or_else(|| ListenerError::Internal("transaction already finished".into()))
    }

    /// Stored cursor for `stream`, if any.
    pub fn get_offset(&mut self, stream: &str) -> ListenerResult<Option<Cursor>> {
        let adapter = self.adapter;
        adapter.get_offset(stream, self.tx()?)
    }

    /// Stores the cursor for `stream`.
    pub fn set_offset(&mut self, stream: &str, cursor: &Cursor) -> ListenerResult<()> {
        let adapter = self.adapter;
        adapter.set_offset(stream, cursor, self.tx()?)
    }

    /// Applies one event.
    pub fn apply_event(&mut self, content: &str) -> ListenerResult<()> {
        let adapter = self.adapter;
        adapter.apply_event(content, self.tx()?)
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> ListenerResult<()> {
        match self.tx.take() {
            Some(tx) => self.adapter.commit(tx),
            None => Err(ListenerError::Internal("transaction already finished".into())),
        }
    }

    /// Rolls the transaction back explicitly.
    pub fn rollback(mut self) {
        if let Some(tx) = self.tx.take() {
            self.adapter.rollback(tx);
        }
    }
}

impl<A: PushAdapter> Drop for TransactionScope<'_, A> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!("rolling back push transaction");
            self.adapter.rollback(tx);
        }
    }
}
