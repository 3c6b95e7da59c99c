use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use workforce_core::{AbsenceRequestId, DomainError, DomainResult, UserId};

/// Entity type name used in error messages and logs.
pub const ENTITY_TYPE: &str = "AbsenceRequest";

/// Lifecycle of an absence request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbsenceStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    /// Synchronisation with the payroll provider failed; terminal.
    Invalid,
}

impl AbsenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceStatus::Pending => "PENDING",
            AbsenceStatus::Approved => "APPROVED",
            AbsenceStatus::Rejected => "REJECTED",
            AbsenceStatus::Cancelled => "CANCELLED",
            AbsenceStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "PENDING" => Ok(AbsenceStatus::Pending),
            "APPROVED" => Ok(AbsenceStatus::Approved),
            "REJECTED" => Ok(AbsenceStatus::Rejected),
            "CANCELLED" => Ok(AbsenceStatus::Cancelled),
            "INVALID" => Ok(AbsenceStatus::Invalid),
            other => Err(DomainError::validation(format!("unknown absence status: {other}"))),
        }
    }

    /// Cancelled or rejected by a person; nothing may reach payroll for it.
    pub fn is_withdrawn(&self) -> bool {
        matches!(self, AbsenceStatus::Rejected | AbsenceStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AbsenceStatus::Rejected | AbsenceStatus::Cancelled | AbsenceStatus::Invalid
        )
    }
}

impl core::fmt::Display for AbsenceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating an absence request.
///
/// Payroll-side identifiers are optional here: a request can be recorded
/// locally before HR has linked the employee or absence type to the payroll
/// provider. The sync handler refuses to send incomplete requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAbsenceRequest {
    pub employee_id: UserId,
    pub approver_id: Option<UserId>,
    pub employee_payroll_id: Option<String>,
    pub absence_type_payroll_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub half_day_start: bool,
    pub half_day_end: bool,
    pub comment: Option<String>,
}

impl NewAbsenceRequest {
    pub fn validate(&self) -> DomainResult<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(DomainError::validation(format!(
                    "end date {end} precedes start date {start}"
                )));
            }
            if start == end && self.half_day_start && self.half_day_end {
                return Err(DomainError::validation(
                    "a single-day absence cannot start and end on a half day",
                ));
            }
        }
        Ok(())
    }
}

/// Absence request entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceRequest {
    pub id: AbsenceRequestId,
    pub employee_id: UserId,
    pub approver_id: Option<UserId>,
    pub employee_payroll_id: Option<String>,
    pub absence_type_payroll_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub half_day_start: bool,
    pub half_day_end: bool,
    pub comment: Option<String>,
    pub status: AbsenceStatus,
    /// Identifier of the absence at the payroll provider, once synced.
    pub payroll_absence_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AbsenceRequest {
    /// Build a pending request from validated input.
    pub fn create(id: AbsenceRequestId, input: NewAbsenceRequest, now: DateTime<Utc>) -> DomainResult<Self> {
        input.validate()?;
        Ok(Self {
            id,
            employee_id: input.employee_id,
            approver_id: input.approver_id,
            employee_payroll_id: input.employee_payroll_id,
            absence_type_payroll_id: input.absence_type_payroll_id,
            start_date: input.start_date,
            end_date: input.end_date,
            half_day_start: input.half_day_start,
            half_day_end: input.half_day_end,
            comment: input.comment,
            status: AbsenceStatus::Pending,
            payroll_absence_id: None,
            created_at: now,
        })
    }

    /// Cancel the request locally.
    pub fn cancel(&mut self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "{ENTITY_TYPE} {} is already {}",
                self.id, self.status
            )));
        }
        self.status = AbsenceStatus::Cancelled;
        Ok(())
    }

    /// Whether the payroll provider knows about this absence.
    pub fn is_synced(&self) -> bool {
        self.payroll_absence_id.is_some()
    }
}
