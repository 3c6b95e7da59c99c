//! Outbox entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use workforce_core::{AbsenceRequestId, DomainError, OutboxEntryId};

/// Message recorded when an entry's operation has no registered handler.
pub const NO_HANDLER_MESSAGE: &str = "No OperationHandler available for this entry's Operation";

/// Payload key holding the absence request an entry concerns.
pub const ABSENCE_REQUEST_ID_KEY: &str = "absenceRequestId";

/// Operation an outbox entry asks to be performed at the payroll provider.
///
/// Closed set: a new operation means a new variant plus a handler registered
/// for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    CreateAbsenceRequest,
    CancelAbsenceRequest,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::CreateAbsenceRequest, Operation::CancelAbsenceRequest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateAbsenceRequest => "CREATE_ABSENCE_REQUEST",
            Operation::CancelAbsenceRequest => "CANCEL_ABSENCE_REQUEST",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown outbox operation: {s}")))
    }
}

/// Delivery status of an outbox entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Waiting for the next scheduler tick
    New,
    /// Handler completed
    Done,
    /// Handler failed or no handler exists; stays here until reset
    Error,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "NEW",
            OutboxStatus::Done => "DONE",
            OutboxStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Done | OutboxStatus::Error)
    }
}

impl core::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OutboxStatus::New),
            "DONE" => Ok(OutboxStatus::Done),
            "ERROR" => Ok(OutboxStatus::Error),
            other => Err(DomainError::validation(format!("unknown outbox status: {other}"))),
        }
    }
}

/// A durable promise to propagate a local decision to the payroll provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub operation: Operation,
    pub status: OutboxStatus,
    /// Opaque to the store; interpreted by the handler.
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
    /// Time of the last terminal transition.
    pub synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl OutboxEntry {
    /// Read a string value from the payload.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(JsonValue::as_str)
    }
}

/// An entry about to be inserted; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub operation: Operation,
    pub data: JsonValue,
}

impl NewOutboxEntry {
    pub fn new(operation: Operation, data: JsonValue) -> Self {
        Self { operation, data }
    }

    /// Entry concerning one absence request.
    pub fn for_absence_request(operation: Operation, id: AbsenceRequestId) -> Self {
        Self::new(
            operation,
            serde_json::json!({ ABSENCE_REQUEST_ID_KEY: id.to_string() }),
        )
    }

    /// Payload must be a JSON object; mirrors the table's check constraint.
    pub fn check(&self) -> Result<(), String> {
        if self.data.is_object() {
            Ok(())
        } else {
            Err(format!(
                "outbox data for {} must be a JSON object, got {}",
                self.operation, self.data
            ))
        }
    }

    /// Materialise the row as the store would on insert.
    pub fn into_entry(self, id: OutboxEntryId, now: DateTime<Utc>) -> OutboxEntry {
        OutboxEntry {
            id,
            operation: self.operation,
            status: OutboxStatus::New,
            data: self.data,
            created_at: now,
            synced_at: None,
            error_message: None,
        }
    }
}

/// Payload of the absence-request operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsencePayload {
    #[serde(rename = "absenceRequestId")]
    pub absence_request_id: AbsenceRequestId,
}

impl AbsencePayload {
    pub fn from_entry(entry: &OutboxEntry) -> Result<Self, serde_json::Error> {
        serde_json::from_value(entry.data.clone())
    }
}

/// Aggregate counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub new: usize,
    pub done: usize,
    pub error: usize,
}
