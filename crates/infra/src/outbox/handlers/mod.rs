//! Handlers that carry outbox entries to the payroll provider.

use workforce_core::OutboxEntryId;

use crate::absence_store::RepositoryError;
use crate::external::PayrollClientError;

mod cancel_absence;
mod create_absence;
mod notify;

pub use cancel_absence::CancelAbsenceRequestHandler;
pub use create_absence::CreateAbsenceRequestHandler;
pub use notify::{NotifyOutcome, StakeholderNotifier, CANCELLED_TEMPLATE, CREATED_TEMPLATE, DEFAULT_LOCALE};

/// Why a handler could not complete an entry.
///
/// Every variant names the entry so the message persisted on the row is
/// enough to find the cause.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("outbox entry {entry_id} has a malformed payload: {reason}")]
    MalformedPayload { entry_id: OutboxEntryId, reason: String },

    #[error("outbox entry {entry_id}: {entity_type} {entity_id} not found")]
    EntityNotFound {
        entry_id: OutboxEntryId,
        entity_type: &'static str,
        entity_id: String,
    },

    #[error("outbox entry {entry_id}: {entity_type} {entity_id} has no value for essential field {field}")]
    EssentialFieldNull {
        entry_id: OutboxEntryId,
        entity_type: &'static str,
        entity_id: String,
        field: &'static str,
    },

    #[error("outbox entry {entry_id}: payroll call failed: {source}")]
    ExternalTransport {
        entry_id: OutboxEntryId,
        source: PayrollClientError,
    },

    #[error("outbox entry {entry_id}: repository failure: {source}")]
    Repository {
        entry_id: OutboxEntryId,
        source: RepositoryError,
    },
}

impl HandlerError {
    /// Short machine-readable code, used as the prefix of the persisted error message.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::MalformedPayload { .. } => "malformed_payload",
            HandlerError::EntityNotFound { .. } => "entity_not_found",
            HandlerError::EssentialFieldNull { .. } => "essential_field_null",
            HandlerError::ExternalTransport { .. } => "external_transport",
            HandlerError::Repository { .. } => "repository",
        }
    }
}

/// Fail with `EssentialFieldNull` when a required value is missing.
pub(crate) fn require<T>(
    value: Option<T>,
    entry_id: OutboxEntryId,
    entity_type: &'static str,
    entity_id: &impl ToString,
    field: &'static str,
) -> Result<T, HandlerError> {
    value.ok_or_else(|| HandlerError::EssentialFieldNull {
        entry_id,
        entity_type,
        entity_id: entity_id.to_string(),
        field,
    })
}
