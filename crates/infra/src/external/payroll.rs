use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Absence period as the payroll provider models it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollAbsence {
    pub employee_id: String,
    pub time_off_type_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub half_day_start: bool,
    pub half_day_end: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayrollRequest {
    CreateAbsence(PayrollAbsence),
    DeleteAbsence { payroll_absence_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayrollResponse {
    Created { payroll_absence_id: String },
    Deleted,
}

/// Payroll client failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayrollClientError {
    /// The provider could not be reached or the exchange broke down.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The provider answered with an error status.
    #[error("payroll provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The provider answered with something the client cannot interpret.
    #[error("unexpected payroll response: {0}")]
    UnexpectedResponse(String),
}

/// Narrow synchronous interface to the payroll provider.
///
/// Timeouts and retries are the client's business; a call either returns or
/// fails within whatever bound the client enforces.
pub trait PayrollClient: Send + Sync {
    fn send(&self, request: PayrollRequest) -> Result<PayrollResponse, PayrollClientError>;
}

impl<C> PayrollClient for std::sync::Arc<C>
where
    C: PayrollClient + ?Sized,
{
    fn send(&self, request: PayrollRequest) -> Result<PayrollResponse, PayrollClientError> {
        (**self).send(request)
    }
}

/// In-memory payroll provider for tests/dev.
///
/// Keeps created absences in a map and records every request it receives.
/// `fail_with` makes subsequent calls fail until cleared.
#[derive(Debug, Default)]
pub struct InMemoryPayrollClient {
    absences: RwLock<HashMap<String, PayrollAbsence>>,
    requests: RwLock<Vec<PayrollRequest>>,
    failure: RwLock<Option<PayrollClientError>>,
    next_id: AtomicU64,
}

impl InMemoryPayrollClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: Option<PayrollClientError>) {
        if let Ok(mut slot) = self.failure.write() {
            *slot = error;
        }
    }

    pub fn requests(&self) -> Vec<PayrollRequest> {
        self.requests.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn absence(&self, payroll_absence_id: &str) -> Option<PayrollAbsence> {
        self.absences.read().ok()?.get(payroll_absence_id).cloned()
    }

    pub fn absence_count(&self) -> usize {
        self.absences.read().map(|a| a.len()).unwrap_or_default()
    }
}

impl PayrollClient for InMemoryPayrollClient {
    fn send(&self, request: PayrollRequest) -> Result<PayrollResponse, PayrollClientError> {
        if let Ok(mut requests) = self.requests.write() {
            requests.push(request.clone());
        }

        if let Some(err) = self.failure.read().ok().and_then(|f| f.clone()) {
            return Err(err);
        }

        let mut absences = self
            .absences
            .write()
            .map_err(|_| PayrollClientError::Transport("payroll store poisoned".to_string()))?;

        match request {
            PayrollRequest::CreateAbsence(absence) => {
                let id = format!("abs-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                debug!(payroll_absence_id = %id, employee_id = %absence.employee_id, "payroll absence created");
                absences.insert(id.clone(), absence);
                Ok(PayrollResponse::Created { payroll_absence_id: id })
            }
            PayrollRequest::DeleteAbsence { payroll_absence_id } => match absences.remove(&payroll_absence_id) {
                Some(_) => Ok(PayrollResponse::Deleted),
                None => Err(PayrollClientError::Rejected {
                    status: 404,
                    body: format!("absence {payroll_absence_id} not found"),
                }),
            },
        }
    }
}
