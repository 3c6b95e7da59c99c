use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{info, warn};

use workforce_absence::AbsenceRequest;
use workforce_core::OutboxEntryId;

use crate::external::{NotificationService, StakeholderDirectory, TemplateArgs};
use crate::outbox::scheduler::panic_message;

pub const CREATED_TEMPLATE: &str = "absence-request-created";
pub const CANCELLED_TEMPLATE: &str = "absence-request-cancelled";
pub const DEFAULT_LOCALE: &str = "en";

/// What happened to a courtesy notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// A link in approver -> account -> email -> person was missing.
    Skipped(&'static str),
    /// The notification service refused or failed.
    Failed,
}

/// Best-effort notification of the approver of an absence request.
///
/// Never fails: by the time this runs the payroll provider has already
/// applied the change, so every problem is logged and swallowed.
#[derive(Clone)]
pub struct StakeholderNotifier {
    directory: Arc<dyn StakeholderDirectory>,
    notifications: Arc<dyn NotificationService>,
}

impl StakeholderNotifier {
    pub fn new(directory: Arc<dyn StakeholderDirectory>, notifications: Arc<dyn NotificationService>) -> Self {
        Self {
            directory,
            notifications,
        }
    }

    pub fn notify(&self, entry_id: OutboxEntryId, template: &str, request: &AbsenceRequest) -> NotifyOutcome {
        let Some(approver_id) = request.approver_id else {
            info!(entry_id = %entry_id, absence_request_id = %request.id, "no approver; skipping notification");
            return NotifyOutcome::Skipped("approver");
        };

        let stakeholder = match self.directory.find_stakeholder(approver_id) {
            Ok(Some(stakeholder)) => stakeholder,
            Ok(None) => {
                info!(entry_id = %entry_id, approver_id = %approver_id, "approver account not found; skipping notification");
                return NotifyOutcome::Skipped("stakeholder");
            }
            Err(e) => {
                warn!(entry_id = %entry_id, approver_id = %approver_id, error = %e, "approver lookup failed; skipping notification");
                return NotifyOutcome::Skipped("stakeholder");
            }
        };

        let Some(email) = stakeholder.email.clone() else {
            info!(entry_id = %entry_id, approver_id = %approver_id, "approver has no email; skipping notification");
            return NotifyOutcome::Skipped("email");
        };

        let person = match stakeholder.person_id.map(|id| self.directory.find_person(id)) {
            Some(Ok(Some(person))) => person,
            Some(Err(e)) => {
                warn!(entry_id = %entry_id, approver_id = %approver_id, error = %e, "person lookup failed; skipping notification");
                return NotifyOutcome::Skipped("person");
            }
            Some(Ok(None)) | None => {
                warn!(entry_id = %entry_id, approver_id = %approver_id, "approver has no person record; skipping notification");
                return NotifyOutcome::Skipped("person");
            }
        };

        let locale = person.locale.as_deref().unwrap_or(DEFAULT_LOCALE);
        let mut args = TemplateArgs::new();
        args.insert("recipientName".to_string(), person.display_name());
        args.insert("absenceRequestId".to_string(), request.id.to_string());
        if let Some(start) = request.start_date {
            args.insert("startDate".to_string(), start.to_string());
        }
        if let Some(end) = request.end_date {
            args.insert("endDate".to_string(), end.to_string());
        }

        let recipients = [email];
        match catch_unwind(AssertUnwindSafe(|| self.notifications.notify(template, locale, &recipients, &args))) {
            Ok(Ok(())) => NotifyOutcome::Sent,
            Ok(Err(e)) => {
                warn!(entry_id = %entry_id, template, error = %e, "notification failed");
                NotifyOutcome::Failed
            }
            Err(payload) => {
                warn!(entry_id = %entry_id, template, panic = panic_message(payload.as_ref()), "notification service panicked");
                NotifyOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use workforce_absence::{NewAbsenceRequest, Person, Stakeholder};
    use workforce_core::{AbsenceRequestId, PersonId, UserId};

    use super::*;
    use crate::external::{InMemoryDirectory, LoggingNotificationService};

    fn request(approver_id: Option<UserId>) -> AbsenceRequest {
        AbsenceRequest::create(
            AbsenceRequestId::new(),
            NewAbsenceRequest {
                employee_id: UserId::new(),
                approver_id,
                employee_payroll_id: None,
                absence_type_payroll_id: None,
                start_date: None,
                end_date: None,
                half_day_start: false,
                half_day_end: false,
                comment: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn setup() -> (Arc<InMemoryDirectory>, Arc<LoggingNotificationService>, StakeholderNotifier) {
        let directory = Arc::new(InMemoryDirectory::new());
        let notifications = Arc::new(LoggingNotificationService::new());
        let notifier = StakeholderNotifier::new(directory.clone(), notifications.clone());
        (directory, notifications, notifier)
    }

    #[test]
    fn locale_defaults_to_english() {
        let (directory, notifications, notifier) = setup();
        let approver = UserId::new();
        let person = PersonId::new();
        directory.add_stakeholder(Stakeholder {
            id: approver,
            email: Some("boss@example.com".to_string()),
            person_id: Some(person),
        });
        directory.add_person(Person {
            id: person,
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            locale: None,
        });

        let outcome = notifier.notify(OutboxEntryId::new(1), CREATED_TEMPLATE, &request(Some(approver)));

        assert_eq!(outcome, NotifyOutcome::Sent);
        let sent = notifications.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].locale, "en");
        assert_eq!(sent[0].recipients, vec!["boss@example.com".to_string()]);
        assert_eq!(sent[0].args.get("recipientName").map(String::as_str), Some("Grace Hopper"));
    }

    #[test]
    fn each_missing_link_is_skipped() {
        let (directory, notifications, notifier) = setup();
        let id = OutboxEntryId::new(1);

        assert_eq!(notifier.notify(id, CREATED_TEMPLATE, &request(None)), NotifyOutcome::Skipped("approver"));

        let approver = UserId::new();
        assert_eq!(
            notifier.notify(id, CREATED_TEMPLATE, &request(Some(approver))),
            NotifyOutcome::Skipped("stakeholder")
        );

        directory.add_stakeholder(Stakeholder {
            id: approver,
            email: None,
            person_id: None,
        });
        assert_eq!(
            notifier.notify(id, CREATED_TEMPLATE, &request(Some(approver))),
            NotifyOutcome::Skipped("email")
        );

        directory.add_stakeholder(Stakeholder {
            id: approver,
            email: Some("boss@example.com".to_string()),
            person_id: Some(PersonId::new()),
        });
        assert_eq!(
            notifier.notify(id, CREATED_TEMPLATE, &request(Some(approver))),
            NotifyOutcome::Skipped("person")
        );

        assert!(notifications.sent().is_empty());
    }
}
