//! Outbox storage boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use workforce_core::OutboxEntryId;

use super::types::{NewOutboxEntry, OutboxEntry, OutboxStats, OutboxStatus};

/// Outbox store used by the scheduler and by operators.
///
/// Status updates are single-row and keyed by id. There is no delete: rows
/// are the audit trail of every propagation attempt.
pub trait OutboxStore: Send + Sync {
    /// Entries with the given status, ascending by id.
    fn find_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxStoreError>;

    /// Get an entry by id.
    fn get(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, OutboxStoreError>;

    /// `NEW -> DONE`. No-op when the entry is already terminal.
    fn mark_done(&self, id: OutboxEntryId) -> Result<Transition, OutboxStoreError>;

    /// `NEW -> ERROR` with a cause. No-op when the entry is already terminal.
    fn mark_error(&self, id: OutboxEntryId, message: &str) -> Result<Transition, OutboxStoreError>;

    /// Operator action: `ERROR -> NEW` so the next tick attempts the entry again.
    fn reset(&self, id: OutboxEntryId) -> Result<(), OutboxStoreError>;

    /// Counts per status.
    fn stats(&self) -> Result<OutboxStats, OutboxStoreError>;
}

/// Insert side of the store, bound to the caller's transaction.
pub trait OutboxWriter {
    fn insert(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntryId, OutboxStoreError>;
}

/// Outcome of a status update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The entry was already terminal; nothing changed.
    AlreadyTerminal(OutboxStatus),
}

/// Outbox store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutboxStoreError {
    #[error("outbox entry not found: {0}")]
    NotFound(OutboxEntryId),
    #[error("outbox entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: OutboxEntryId,
        from: OutboxStatus,
        to: OutboxStatus,
    },
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<crate::absence_store::RepositoryError> for OutboxStoreError {
    fn from(err: crate::absence_store::RepositoryError) -> Self {
        OutboxStoreError::Storage(err.to_string())
    }
}

/// Apply a terminal transition to an entry held in memory.
pub(crate) fn finish(
    entry: &mut OutboxEntry,
    target: OutboxStatus,
    message: Option<&str>,
    now: DateTime<Utc>,
) -> Transition {
    if entry.status.is_terminal() {
        warn!(
            entry_id = %entry.id,
            status = %entry.status,
            target = %target,
            "outbox entry already terminal; ignoring update"
        );
        return Transition::AlreadyTerminal(entry.status);
    }

    entry.status = target;
    entry.synced_at = Some(now);
    if let Some(message) = message {
        entry.error_message = Some(message.to_string());
    }
    Transition::Applied
}

/// Move an `ERROR` entry held in memory back to `NEW`.
///
/// `error_message` is kept so the previous failure stays visible.
pub(crate) fn reopen(entry: &mut OutboxEntry) -> Result<(), OutboxStoreError> {
    if entry.status != OutboxStatus::Error {
        return Err(OutboxStoreError::InvalidTransition {
            id: entry.id,
            from: entry.status,
            to: OutboxStatus::New,
        });
    }
    entry.status = OutboxStatus::New;
    entry.synced_at = None;
    Ok(())
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn find_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        (**self).find_by_status(status)
    }

    fn get(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, OutboxStoreError> {
        (**self).get(id)
    }

    fn mark_done(&self, id: OutboxEntryId) -> Result<Transition, OutboxStoreError> {
        (**self).mark_done(id)
    }

    fn mark_error(&self, id: OutboxEntryId, message: &str) -> Result<Transition, OutboxStoreError> {
        (**self).mark_error(id, message)
    }

    fn reset(&self, id: OutboxEntryId) -> Result<(), OutboxStoreError> {
        (**self).reset(id)
    }

    fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        (**self).stats()
    }
}
