use std::sync::Arc;

use tracing::{debug, error, info};

use workforce_absence::{AbsenceRequest, AbsenceStatus, ENTITY_TYPE};
use workforce_core::OutboxEntryId;

use super::notify::{StakeholderNotifier, CREATED_TEMPLATE};
use super::{require, HandlerError};
use crate::absence_store::AbsenceRequestRepository;
use crate::external::{PayrollAbsence, PayrollClient, PayrollClientError, PayrollRequest, PayrollResponse};
use crate::outbox::registry::OperationHandler;
use crate::outbox::types::{AbsencePayload, Operation, OutboxEntry};

/// Creates the absence at the payroll provider.
pub struct CreateAbsenceRequestHandler {
    repository: Arc<dyn AbsenceRequestRepository>,
    payroll: Arc<dyn PayrollClient>,
    notifier: StakeholderNotifier,
}

impl CreateAbsenceRequestHandler {
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

    fn build_request(entry_id: OutboxEntryId, request: &AbsenceRequest) -> Result<PayrollAbsence, HandlerError> {
        let employee_id = require(
            request.employee_payroll_id.clone(),
            entry_id,
            ENTITY_TYPE,
            &request.id,
            "employee_payroll_id",
        )?;
        let time_off_type_id = require(
            request.absence_type_payroll_id.clone(),
            entry_id,
            ENTITY_TYPE,
            &request.id,
            "absence_type_payroll_id",
        )?;
        let start_date = require(request.start_date, entry_id, ENTITY_TYPE, &request.id, "start_date")?;
        let end_date = require(request.end_date, entry_id, ENTITY_TYPE, &request.id, "end_date")?;

        Ok(PayrollAbsence {
            employee_id,
            time_off_type_id,
            start_date,
            end_date,
            half_day_start: request.half_day_start,
            half_day_end: request.half_day_end,
            comment: request.comment.clone(),
        })
    }

    fn create(&self, absence: PayrollAbsence) -> Result<String, PayrollClientError> {
        match self.payroll.send(PayrollRequest::CreateAbsence(absence))? {
            PayrollResponse::Created { payroll_absence_id } => Ok(payroll_absence_id),
            other => Err(PayrollClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

impl OperationHandler for CreateAbsenceRequestHandler {
    fn supports(&self) -> Operation {
        Operation::CreateAbsenceRequest
    }

    fn handle(&self, entry: &OutboxEntry) -> Result<(), HandlerError> {
        let entry_id = entry.id;
        let payload = AbsencePayload::from_entry(entry).map_err(|e| HandlerError::MalformedPayload {
            entry_id,
            reason: e.to_string(),
        })?;
        let id = payload.absence_request_id;

        let request = self
            .repository
            .find(id)
            .map_err(|source| HandlerError::Repository { entry_id, source })?
            .ok_or_else(|| HandlerError::EntityNotFound {
                entry_id,
                entity_type: ENTITY_TYPE,
                entity_id: id.to_string(),
            })?;

        if request.status.is_withdrawn() {
            info!(
                entry_id = %entry_id,
                absence_request_id = %id,
                status = %request.status,
                "absence request withdrawn before sync; nothing to send"
            );
            return Ok(());
        }

        let absence = Self::build_request(entry_id, &request)?;
        debug!(entry_id = %entry_id, absence_request_id = %id, "creating payroll absence");

        let payroll_absence_id = match self.create(absence) {
            Ok(payroll_absence_id) => payroll_absence_id,
            Err(source) => {
                if let Err(e) = self.repository.update_status(id, AbsenceStatus::Invalid) {
                    error!(entry_id = %entry_id, absence_request_id = %id, error = %e, "failed to mark absence request invalid");
                }
                return Err(HandlerError::ExternalTransport { entry_id, source });
            }
        };

        info!(entry_id = %entry_id, absence_request_id = %id, payroll_absence_id = %payroll_absence_id, "payroll absence created");

        // Payroll has applied the change; nothing below fails the entry.
        if let Err(e) = self.repository.record_payroll_id(id, &payroll_absence_id) {
            error!(
                entry_id = %entry_id,
                absence_request_id = %id,
                payroll_absence_id = %payroll_absence_id,
                error = %e,
                "failed to record payroll absence id"
            );
        }
        if request.status == AbsenceStatus::Invalid {
            match self.repository.update_status(id, AbsenceStatus::Pending) {
                Ok(()) => info!(entry_id = %entry_id, absence_request_id = %id, "absence request sync recovered"),
                Err(e) => {
                    error!(entry_id = %entry_id, absence_request_id = %id, error = %e, "failed to clear invalid status")
                }
            }
        }

        self.notifier.notify(entry_id, CREATED_TEMPLATE, &request);
        Ok(())
    }
}
