//! Persistence boundary for absence requests.

use std::sync::Arc;

use workforce_absence::{AbsenceRequest, AbsenceStatus};
use workforce_core::AbsenceRequestId;

pub mod postgres;

pub use postgres::PostgresAbsenceStore;

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("absence request not found: {0}")]
    NotFound(AbsenceRequestId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub(crate) fn poisoned() -> Self {
        Self::Storage("lock poisoned".to_string())
    }
}

/// Read/update access to absence requests used by the sync handlers.
///
/// Inserts go through a transaction together with the outbox entry; see
/// [`crate::in_memory::InMemoryDatabase::transaction`] and
/// [`PostgresAbsenceStore::submit`].
pub trait AbsenceRequestRepository: Send + Sync {
    fn find(&self, id: AbsenceRequestId) -> Result<Option<AbsenceRequest>, RepositoryError>;

    fn update_status(&self, id: AbsenceRequestId, status: AbsenceStatus) -> Result<(), RepositoryError>;

    /// Store the identifier the payroll provider assigned to the absence.
    fn record_payroll_id(&self, id: AbsenceRequestId, payroll_absence_id: &str) -> Result<(), RepositoryError>;
}

impl<R> AbsenceRequestRepository for Arc<R>
where
    R: AbsenceRequestRepository + ?Sized,
{
    fn find(&self, id: AbsenceRequestId) -> Result<Option<AbsenceRequest>, RepositoryError> {
        (**self).find(id)
    }

    fn update_status(&self, id: AbsenceRequestId, status: AbsenceStatus) -> Result<(), RepositoryError> {
        (**self).update_status(id, status)
    }

    fn record_payroll_id(&self, id: AbsenceRequestId, payroll_absence_id: &str) -> Result<(), RepositoryError> {
        (**self).record_payroll_id(id, payroll_absence_id)
    }
}
