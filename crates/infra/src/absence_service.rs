//! Domain write path for absence requests.
//!
//! Every mutation that must reach the payroll provider writes its outbox
//! entry in the same transaction as the domain row.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use workforce_absence::{AbsenceRequest, AbsenceStatus, NewAbsenceRequest};
use workforce_context::ContextHolder;
use workforce_core::{AbsenceRequestId, DomainError, OutboxEntryId};

use crate::absence_store::RepositoryError;
use crate::in_memory::InMemoryDatabase;
use crate::outbox::store::{OutboxStoreError, OutboxWriter};
use crate::outbox::types::{NewOutboxEntry, Operation};

#[derive(Debug, thiserror::Error)]
pub enum AbsenceServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Outbox(#[from] OutboxStoreError),
}

/// Result of a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancellation {
    pub status: AbsenceStatus,
    /// Set when the payroll provider must be told; unsynced requests are
    /// only cancelled locally.
    pub outbox_entry: Option<OutboxEntryId>,
}

pub struct AbsenceRequestService {
    db: Arc<InMemoryDatabase>,
}

impl AbsenceRequestService {
    pub fn new(db: Arc<InMemoryDatabase>) -> Self {
        Self { db }
    }

    /// Record a new request and queue its creation at the payroll provider.
    pub fn submit(&self, input: NewAbsenceRequest) -> Result<AbsenceRequestId, AbsenceServiceError> {
        let actor = ContextHolder::current();
        let request = AbsenceRequest::create(AbsenceRequestId::new(), input, Utc::now())?;
        let id = request.id;

        let entry_id = self.db.transaction(|tx| -> Result<_, AbsenceServiceError> {
            tx.insert_absence(request)?;
            Ok(tx.insert(NewOutboxEntry::for_absence_request(Operation::CreateAbsenceRequest, id))?)
        })?;

        info!(absence_request_id = %id, entry_id = %entry_id, actor = %actor, "absence request submitted");
        Ok(id)
    }

    /// Cancel a request locally and, if payroll already knows it, queue the deletion there.
    pub fn cancel(&self, id: AbsenceRequestId) -> Result<Cancellation, AbsenceServiceError> {
        let actor = ContextHolder::current();

        let cancellation = self.db.transaction(|tx| -> Result<_, AbsenceServiceError> {
            let request = tx.absence_mut(id)?;
            request.cancel()?;
            let synced = request.is_synced();

            let outbox_entry = if synced {
                Some(tx.insert(NewOutboxEntry::for_absence_request(Operation::CancelAbsenceRequest, id))?)
            } else {
                None
            };
            Ok(Cancellation {
                status: AbsenceStatus::Cancelled,
                outbox_entry,
            })
        })?;

        info!(
            absence_request_id = %id,
            entry_id = ?cancellation.outbox_entry,
            actor = %actor,
            "absence request cancelled"
        );
        Ok(cancellation)
    }
}
