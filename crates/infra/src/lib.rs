//! Infrastructure for absence-request synchronisation: the transactional
//! outbox, its scheduler and handlers, storage adapters, configuration and
//! process wiring.

pub mod absence_service;
pub mod absence_store;
pub mod config;
pub mod external;
pub mod in_memory;
pub mod outbox;
pub mod periodic;
pub mod runtime;

pub use absence_service::{AbsenceRequestService, AbsenceServiceError, Cancellation};
pub use config::{AppConfig, ConfigError};
pub use in_memory::InMemoryDatabase;
pub use runtime::OutboxRuntime;

#[cfg(test)]
mod integration_tests;
