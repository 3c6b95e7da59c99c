//! In-memory database holding the absence-request and outbox tables.
//!
//! Used by tests and local development. [`InMemoryDatabase::transaction`]
//! gives the same all-or-nothing guarantee the Postgres adapters get from a
//! database transaction: the closure works on a staged copy of both tables,
//! which replaces the live tables only if the closure returns `Ok`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use workforce_absence::{AbsenceRequest, AbsenceStatus};
use workforce_core::{AbsenceRequestId, OutboxEntryId};

use crate::absence_store::{AbsenceRequestRepository, RepositoryError};
use crate::outbox::store::{finish, reopen, OutboxStore, OutboxStoreError, OutboxWriter, Transition};
use crate::outbox::types::{NewOutboxEntry, OutboxEntry, OutboxStats, OutboxStatus};

#[derive(Debug, Clone, Default)]
struct Tables {
    absences: HashMap<AbsenceRequestId, AbsenceRequest>,
    outbox: BTreeMap<OutboxEntryId, OutboxEntry>,
    last_outbox_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Run `f` inside a transaction.
    ///
    /// Transactions are serialised. `f` must not call back into this
    /// database through any other method; it would deadlock.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&mut InMemoryTransaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let mut live = self.lock().map_err(E::from)?;
        let mut tx = InMemoryTransaction {
            staged: live.clone(),
        };
        let value = f(&mut tx)?;
        *live = tx.staged;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables.lock().map_err(|_| RepositoryError::poisoned())
    }

    fn lock_outbox(&self) -> Result<MutexGuard<'_, Tables>, OutboxStoreError> {
        self.tables
            .lock()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))
    }

    fn finish_entry(
        &self,
        id: OutboxEntryId,
        target: OutboxStatus,
        message: Option<&str>,
    ) -> Result<Transition, OutboxStoreError> {
        let mut tables = self.lock_outbox()?;
        let entry = tables.outbox.get_mut(&id).ok_or(OutboxStoreError::NotFound(id))?;
        Ok(finish(entry, target, message, Utc::now()))
    }
}

/// Staged view of the database inside [`InMemoryDatabase::transaction`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    staged: Tables,
}

impl InMemoryTransaction {
    pub fn insert_absence(&mut self, request: AbsenceRequest) -> Result<(), RepositoryError> {
        if self.staged.absences.contains_key(&request.id) {
            return Err(RepositoryError::Storage(format!(
                "absence request {} already exists",
                request.id
            )));
        }
        self.staged.absences.insert(request.id, request);
        Ok(())
    }

    pub fn find_absence(&self, id: AbsenceRequestId) -> Option<&AbsenceRequest> {
        self.staged.absences.get(&id)
    }

    pub fn absence_mut(&mut self, id: AbsenceRequestId) -> Result<&mut AbsenceRequest, RepositoryError> {
        self.staged.absences.get_mut(&id).ok_or(RepositoryError::NotFound(id))
    }
}

impl OutboxWriter for InMemoryTransaction {
    fn insert(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntryId, OutboxStoreError> {
        entry.check().map_err(OutboxStoreError::Constraint)?;

        self.staged.last_outbox_id += 1;
        let id = OutboxEntryId::new(self.staged.last_outbox_id);
        self.staged.outbox.insert(id, entry.into_entry(id, Utc::now()));
        Ok(id)
    }
}

impl OutboxStore for InMemoryDatabase {
    fn find_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        let tables = self.lock_outbox()?;
        Ok(tables
            .outbox
            .values()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect())
    }

    fn get(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, OutboxStoreError> {
        Ok(self.lock_outbox()?.outbox.get(&id).cloned())
    }

    fn mark_done(&self, id: OutboxEntryId) -> Result<Transition, OutboxStoreError> {
        self.finish_entry(id, OutboxStatus::Done, None)
    }

    fn mark_error(&self, id: OutboxEntryId, message: &str) -> Result<Transition, OutboxStoreError> {
        self.finish_entry(id, OutboxStatus::Error, Some(message))
    }

    fn reset(&self, id: OutboxEntryId) -> Result<(), OutboxStoreError> {
        let mut tables = self.lock_outbox()?;
        let entry = tables.outbox.get_mut(&id).ok_or(OutboxStoreError::NotFound(id))?;
        reopen(entry)
    }

    fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let tables = self.lock_outbox()?;
        let mut stats = OutboxStats::default();
        for entry in tables.outbox.values() {
            match entry.status {
                OutboxStatus::New => stats.new += 1,
                OutboxStatus::Done => stats.done += 1,
                OutboxStatus::Error => stats.error += 1,
            }
        }
        Ok(stats)
    }
}

impl AbsenceRequestRepository for InMemoryDatabase {
    fn find(&self, id: AbsenceRequestId) -> Result<Option<AbsenceRequest>, RepositoryError> {
        Ok(self.lock()?.absences.get(&id).cloned())
    }

    fn update_status(&self, id: AbsenceRequestId, status: AbsenceStatus) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let request = tables.absences.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        request.status = status;
        Ok(())
    }

    fn record_payroll_id(&self, id: AbsenceRequestId, payroll_absence_id: &str) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let request = tables.absences.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        request.payroll_absence_id = Some(payroll_absence_id.to_string());
        Ok(())
    }
}
