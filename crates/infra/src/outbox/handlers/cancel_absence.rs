use std::sync::Arc;

use tracing::{error, info};

use workforce_absence::{AbsenceStatus, ENTITY_TYPE};

use super::notify::{StakeholderNotifier, CANCELLED_TEMPLATE};
use super::{require, HandlerError};
use crate::absence_store::AbsenceRequestRepository;
use crate::external::{PayrollClient, PayrollClientError, PayrollRequest, PayrollResponse};
use crate::outbox::registry::OperationHandler;
use crate::outbox::types::{AbsencePayload, Operation, OutboxEntry};

/// Deletes a previously synced absence at the payroll provider.
pub struct CancelAbsenceRequestHandler {
    repository: Arc<dyn AbsenceRequestRepository>,
    payroll: Arc<dyn PayrollClient>,
    notifier: StakeholderNotifier,
}

impl CancelAbsenceRequestHandler {
    pub fn new(
        repository: Arc<dyn AbsenceRequestRepository>,
        payroll: Arc<dyn PayrollClient>,
        notifier: StakeholderNotifier,
    ) -> Self {
        Self {
            repository,
            payroll,
            notifier,
        }
    }

    fn delete(&self, payroll_absence_id: String) -> Result<(), PayrollClientError> {
        match self.payroll.send(PayrollRequest::DeleteAbsence { payroll_absence_id })? {
            PayrollResponse::Deleted => Ok(()),
            other => Err(PayrollClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

impl OperationHandler for CancelAbsenceRequestHandler {
    fn supports(&self) -> Operation {
        Operation::CancelAbsenceRequest
    }

    fn handle(&self, entry: &OutboxEntry) -> Result<(), HandlerError> {
        let entry_id = entry.id;
        let id = AbsencePayload::from_entry(entry)
            .map_err(|e| HandlerError::MalformedPayload {
                entry_id,
                reason: e.to_string(),
            })?
            .absence_request_id;

        let request = self
            .repository
            .find(id)
            .map_err(|source| HandlerError::Repository { entry_id, source })?
            .ok_or_else(|| HandlerError::EntityNotFound {
                entry_id,
                entity_type: ENTITY_TYPE,
                entity_id: id.to_string(),
            })?;

        let payroll_absence_id = require(
            request.payroll_absence_id.clone(),
            entry_id,
            ENTITY_TYPE,
            &request.id,
            "payroll_absence_id",
        )?;

        if let Err(source) = self.delete(payroll_absence_id.clone()) {
            if let Err(e) = self.repository.update_status(id, AbsenceStatus::Invalid) {
                error!(entry_id = %entry_id, absence_request_id = %id, error = %e, "failed to mark absence request invalid");
            }
            return Err(HandlerError::ExternalTransport { entry_id, source });
        }
        info!(entry_id = %entry_id, absence_request_id = %id, payroll_absence_id = %payroll_absence_id, "payroll absence deleted");

        self.notifier.notify(entry_id, CANCELLED_TEMPLATE, &request);
        Ok(())
    }
}
