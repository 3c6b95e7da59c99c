//! Collaborators outside this service: the payroll provider, outbound
//! notifications and the user directory.
//!
//! Only the interfaces plus in-memory adapters for tests/dev live here. The
//! HTTP client for the payroll provider and the mail sender are deployed
//! separately.

pub mod directory;
pub mod notification;
pub mod payroll;

pub use directory::{InMemoryDirectory, StakeholderDirectory};
pub use notification::{
    LoggingNotificationService, NotificationError, NotificationService, SentNotification, TemplateArgs,
};
pub use payroll::{
    InMemoryPayrollClient, PayrollAbsence, PayrollClient, PayrollClientError, PayrollRequest, PayrollResponse,
};
