//! Transactional outbox.
//!
//! A domain write and the [`OutboxEntry`] promising to propagate it commit
//! in one transaction. The [`OutboxScheduler`] later hands each `NEW` entry
//! to the handler registered for its [`Operation`] and records `DONE` or
//! `ERROR`. Failed entries stay failed until an operator calls
//! [`OutboxStore::reset`].

pub mod handlers;
pub mod postgres;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use handlers::{CancelAbsenceRequestHandler, CreateAbsenceRequestHandler, HandlerError, StakeholderNotifier};
pub use postgres::{ensure_schema, PostgresOutboxStore};
pub use registry::{OperationHandler, OperationHandlerRegistry, RegistryError};
pub use scheduler::{install, OutboxScheduler, TickReport, TICK_JOB_NAME};
pub use store::{OutboxStore, OutboxStoreError, OutboxWriter, Transition};
pub use types::{
    AbsencePayload, NewOutboxEntry, Operation, OutboxEntry, OutboxStats, OutboxStatus, ABSENCE_REQUEST_ID_KEY,
    NO_HANDLER_MESSAGE,
};

pub use crate::periodic::ScheduledJobId;
