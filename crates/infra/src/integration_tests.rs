//! End-to-end tests over the in-memory database.
//!
//! Flow: AbsenceRequestService -> outbox entry -> OutboxScheduler tick ->
//! handler -> payroll client / notification service.
//!
//! Verifies:
//! - domain row and outbox entry commit or roll back together
//! - FIFO attempt order and per-entry failure isolation
//! - precondition, transport and notification failure policies
//! - identity propagation through the background pool without leaks

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::NaiveDate;

    use workforce_absence::{AbsenceRequest, AbsenceStatus, NewAbsenceRequest, Person, Stakeholder};
    use workforce_context::{BackgroundPool, ContextHolder, ExecutionContext, PoolConfig, RequestScope};
    use workforce_core::{AbsenceRequestId, OutboxEntryId, PersonId, UserId};

    use crate::absence_service::AbsenceRequestService;
    use crate::absence_store::{AbsenceRequestRepository, RepositoryError};
    use crate::config::{AppConfig, OutboxConfig};
    use crate::external::{
        InMemoryDirectory, InMemoryPayrollClient, LoggingNotificationService, NotificationError,
        NotificationService, PayrollClientError, PayrollRequest, TemplateArgs,
    };
    use crate::in_memory::InMemoryDatabase;
    use crate::outbox::handlers::{CANCELLED_TEMPLATE, CREATED_TEMPLATE};
    use crate::outbox::{
        CancelAbsenceRequestHandler, CreateAbsenceRequestHandler, NewOutboxEntry, Operation, OperationHandler,
        OperationHandlerRegistry, OutboxScheduler, OutboxStatus, OutboxStore, OutboxStoreError, OutboxWriter,
        StakeholderNotifier, TickReport, NO_HANDLER_MESSAGE,
    };
    use crate::runtime::OutboxRuntime;

    struct FailingNotifications;

    impl NotificationService for FailingNotifications {
        fn notify(&self, _: &str, _: &str, _: &[String], _: &TemplateArgs) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("smtp relay unavailable".to_string()))
        }
    }

    struct PanickingNotifications;

    impl NotificationService for PanickingNotifications {
        fn notify(&self, _: &str, _: &str, _: &[String], _: &TemplateArgs) -> Result<(), NotificationError> {
            panic!("template renderer crashed");
        }
    }

    /// Delegates to the database but cannot store payroll ids.
    struct ReadOnlyPayrollIds(Arc<InMemoryDatabase>);

    impl AbsenceRequestRepository for ReadOnlyPayrollIds {
        fn find(&self, id: AbsenceRequestId) -> Result<Option<AbsenceRequest>, RepositoryError> {
            self.0.find(id)
        }

        fn update_status(&self, id: AbsenceRequestId, status: AbsenceStatus) -> Result<(), RepositoryError> {
            self.0.update_status(id, status)
        }

        fn record_payroll_id(&self, _: AbsenceRequestId, _: &str) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("disk full".to_string()))
        }
    }

    struct Harness {
        db: Arc<InMemoryDatabase>,
        payroll: Arc<InMemoryPayrollClient>,
        directory: Arc<InMemoryDirectory>,
        notifications: Arc<LoggingNotificationService>,
        service: AbsenceRequestService,
        approver: UserId,
    }

    impl Harness {
        fn new() -> Self {
            let db = InMemoryDatabase::arc();
            let directory = Arc::new(InMemoryDirectory::new());
            let approver = UserId::new();
            let person = PersonId::new();
            directory.add_stakeholder(Stakeholder {
                id: approver,
                email: Some("approver@example.com".to_string()),
                person_id: Some(person),
            });
            directory.add_person(Person {
                id: person,
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                locale: Some("de".to_string()),
            });

            Self {
                service: AbsenceRequestService::new(db.clone()),
                db,
                payroll: Arc::new(InMemoryPayrollClient::new()),
                directory,
                notifications: Arc::new(LoggingNotificationService::new()),
                approver,
            }
        }

        fn handlers_with(&self, notifications: Arc<dyn NotificationService>) -> Vec<Arc<dyn OperationHandler>> {
            let notifier = StakeholderNotifier::new(self.directory.clone(), notifications);
            let create: Arc<dyn OperationHandler> = Arc::new(CreateAbsenceRequestHandler::new(
                self.db.clone(),
                self.payroll.clone(),
                notifier.clone(),
            ));
            let cancel: Arc<dyn OperationHandler> =
                Arc::new(CancelAbsenceRequestHandler::new(self.db.clone(), self.payroll.clone(), notifier));
            vec![create, cancel]
        }

        fn handlers(&self) -> Vec<Arc<dyn OperationHandler>> {
            self.handlers_with(self.notifications.clone())
        }

        fn scheduler(&self) -> OutboxScheduler<Arc<InMemoryDatabase>> {
            OutboxScheduler::new(self.db.clone(), OperationHandlerRegistry::new(self.handlers()).unwrap())
        }

        fn input(&self, employee_payroll_id: &str) -> NewAbsenceRequest {
            NewAbsenceRequest {
                employee_id: UserId::new(),
                approver_id: Some(self.approver),
                employee_payroll_id: Some(employee_payroll_id.to_string()),
                absence_type_payroll_id: Some("vacation".to_string()),
                start_date: NaiveDate::from_ymd_opt(2024, 12, 23),
                end_date: NaiveDate::from_ymd_opt(2024, 12, 27),
                half_day_start: false,
                half_day_end: true,
                comment: None,
            }
        }

        fn only_entry(&self, status: OutboxStatus) -> crate::outbox::OutboxEntry {
            let mut entries = self.db.find_by_status(status).unwrap();
            assert_eq!(entries.len(), 1, "expected exactly one {status} entry");
            entries.remove(0)
        }

        fn created_employee_ids(&self) -> Vec<String> {
            self.payroll
                .requests()
                .into_iter()
                .filter_map(|r| match r {
                    PayrollRequest::CreateAbsence(absence) => Some(absence.employee_id),
                    PayrollRequest::DeleteAbsence { .. } => None,
                })
                .collect()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn submitted_request_reaches_payroll_and_notifies_approver() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();

        let report = h.scheduler().tick();

        assert_eq!(report, TickReport { attempted: 1, done: 1, failed: 0 });
        let entry = h.only_entry(OutboxStatus::Done);
        assert!(entry.synced_at.is_some());
        assert!(entry.error_message.is_none());

        let request = h.db.find(id).unwrap().unwrap();
        let payroll_id = request.payroll_absence_id.expect("payroll id recorded");
        let absence = h.payroll.absence(&payroll_id).unwrap();
        assert_eq!(absence.employee_id, "emp-1");
        assert!(absence.half_day_end);

        let sent = h.notifications.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, CREATED_TEMPLATE);
        assert_eq!(sent[0].locale, "de");
        assert_eq!(sent[0].recipients, vec!["approver@example.com".to_string()]);
    }

    #[test]
    fn failed_outbox_insert_rolls_back_the_domain_write() {
        let h = Harness::new();
        let id = AbsenceRequestId::new();
        let request = workforce_absence::AbsenceRequest::create(id, h.input("emp-1"), chrono::Utc::now()).unwrap();

        let result = h.db.transaction(|tx| -> Result<(), OutboxStoreError> {
            tx.insert_absence(request)?;
            tx.insert(NewOutboxEntry::new(Operation::CreateAbsenceRequest, serde_json::json!(null)))?;
            Ok(())
        });

        assert!(matches!(result, Err(OutboxStoreError::Constraint(_))));
        assert!(h.db.find(id).unwrap().is_none());
        assert_eq!(h.db.stats().unwrap().new, 0);
    }

    #[test]
    fn entries_are_attempted_oldest_first() {
        let h = Harness::new();
        for emp in ["emp-1", "emp-2", "emp-3"] {
            h.service.submit(h.input(emp)).unwrap();
        }

        h.scheduler().tick();

        assert_eq!(h.created_employee_ids(), vec!["emp-1", "emp-2", "emp-3"]);
    }

    #[test]
    fn one_failing_entry_does_not_block_the_next() {
        let h = Harness::new();
        let missing = AbsenceRequestId::new();
        let broken = h
            .db
            .transaction(|tx| -> Result<_, OutboxStoreError> {
                tx.insert(NewOutboxEntry::for_absence_request(Operation::CreateAbsenceRequest, missing))
            })
            .unwrap();
        let id = h.service.submit(h.input("emp-2")).unwrap();

        let report = h.scheduler().tick();

        assert_eq!(report, TickReport { attempted: 2, done: 1, failed: 1 });
        let failed = h.db.get(broken).unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Error);
        let message = failed.error_message.unwrap();
        assert!(message.starts_with("entity_not_found: "));
        assert!(message.contains(&missing.to_string()));
        assert!(message.contains("AbsenceRequest"));
        assert!(h.db.find(id).unwrap().unwrap().payroll_absence_id.is_some());
    }

    #[test]
    fn operation_without_handler_is_marked_error() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        h.db.record_payroll_id(id, "abs-external").unwrap();
        h.service.cancel(id).unwrap();

        let create_only: Vec<Arc<dyn OperationHandler>> = h.handlers().into_iter().take(1).collect();
        let scheduler = OutboxScheduler::new(h.db.clone(), OperationHandlerRegistry::new(create_only).unwrap());
        let report = scheduler.tick();

        assert_eq!(report.attempted, 2);
        let failed = h.only_entry(OutboxStatus::Error);
        assert_eq!(failed.operation, Operation::CancelAbsenceRequest);
        assert_eq!(failed.error_message.as_deref(), Some(NO_HANDLER_MESSAGE));
    }

    #[test]
    fn rerunning_a_tick_processes_nothing() {
        let h = Harness::new();
        h.service.submit(h.input("emp-1")).unwrap();
        h.service.submit(h.input("emp-2")).unwrap();
        let scheduler = h.scheduler();

        assert_eq!(scheduler.tick().attempted, 2);
        assert_eq!(scheduler.tick(), TickReport::default());
        assert_eq!(h.payroll.requests().len(), 2);
    }

    #[test]
    fn missing_required_date_fails_with_a_descriptive_message() {
        let h = Harness::new();
        let mut input = h.input("emp-1");
        input.start_date = None;
        let id = h.service.submit(input).unwrap();

        h.scheduler().tick();

        let entry = h.only_entry(OutboxStatus::Error);
        let message = entry.error_message.unwrap();
        assert!(message.starts_with("essential_field_null: "));
        assert!(message.contains(&entry.id.to_string()));
        assert!(message.contains("AbsenceRequest"));
        assert!(message.contains(&id.to_string()));
        assert!(message.contains("start_date"));
        assert!(h.payroll.requests().is_empty());
        assert_eq!(h.db.find(id).unwrap().unwrap().status, AbsenceStatus::Pending);
    }

    #[test]
    fn transport_failure_invalidates_the_request() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        h.payroll
            .fail_with(Some(PayrollClientError::Transport("connection refused".to_string())));

        h.scheduler().tick();

        let entry = h.only_entry(OutboxStatus::Error);
        let message = entry.error_message.unwrap();
        assert!(message.starts_with("external_transport: "));
        assert!(message.contains("connection refused"));
        assert_eq!(h.db.find(id).unwrap().unwrap().status, AbsenceStatus::Invalid);
        assert!(h.notifications.sent().is_empty());
    }

    #[test]
    fn notification_failure_does_not_fail_the_entry() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        let registry = OperationHandlerRegistry::new(h.handlers_with(Arc::new(FailingNotifications))).unwrap();

        let report = OutboxScheduler::new(h.db.clone(), registry).tick();

        assert_eq!(report.done, 1);
        h.only_entry(OutboxStatus::Done);
        assert!(h.db.find(id).unwrap().unwrap().payroll_absence_id.is_some());
    }

    #[test]
    fn panicking_notification_service_does_not_fail_the_entry() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        let registry = OperationHandlerRegistry::new(h.handlers_with(Arc::new(PanickingNotifications))).unwrap();

        let report = OutboxScheduler::new(h.db.clone(), registry).tick();

        assert_eq!(report, TickReport { attempted: 1, done: 1, failed: 0 });
        assert!(h.only_entry(OutboxStatus::Done).error_message.is_none());
        assert_eq!(h.payroll.absence_count(), 1);
        assert!(h.db.find(id).unwrap().unwrap().payroll_absence_id.is_some());
    }

    #[test]
    fn unrecorded_payroll_id_still_completes_the_entry() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        let notifier = StakeholderNotifier::new(h.directory.clone(), h.notifications.clone());
        let create: Arc<dyn OperationHandler> = Arc::new(CreateAbsenceRequestHandler::new(
            Arc::new(ReadOnlyPayrollIds(h.db.clone())),
            h.payroll.clone(),
            notifier,
        ));
        let registry = OperationHandlerRegistry::new(vec![create]).unwrap();

        let report = OutboxScheduler::new(h.db.clone(), registry).tick();

        assert_eq!(report.done, 1);
        h.only_entry(OutboxStatus::Done);
        assert_eq!(h.payroll.absence_count(), 1);
        assert!(h.db.find(id).unwrap().unwrap().payroll_absence_id.is_none());
    }

    #[test]
    fn request_cancelled_before_sync_never_reaches_payroll() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        let cancellation = h.service.cancel(id).unwrap();
        assert!(cancellation.outbox_entry.is_none());

        let report = h.scheduler().tick();

        assert_eq!(report, TickReport { attempted: 1, done: 1, failed: 0 });
        h.only_entry(OutboxStatus::Done);
        assert_eq!(h.payroll.absence_count(), 0);
        assert!(h.payroll.requests().is_empty());
        let request = h.db.find(id).unwrap().unwrap();
        assert_eq!(request.status, AbsenceStatus::Cancelled);
        assert!(request.payroll_absence_id.is_none());
        assert!(h.notifications.sent().is_empty());
    }

    #[test]
    fn cancelling_a_synced_request_deletes_it_at_payroll() {
        let h = Harness::new();
        let id = h.service.submit(h.input("emp-1")).unwrap();
        let scheduler = h.scheduler();
        scheduler.tick();
        let payroll_id = h.db.find(id).unwrap().unwrap().payroll_absence_id.unwrap();

        let cancellation = h.service.cancel(id).unwrap();
        let report = scheduler.tick();

        assert_eq!(report, TickReport { attempted: 1, done: 1, failed: 0 });
        let entry_id = cancellation.outbox_entry.unwrap();
        assert_eq!(h.db.get(entry_id).unwrap().unwrap().status, OutboxStatus::Done);
        assert!(h.payroll.absence(&payroll_id).is_none());
        assert_eq!(h.db.find(id).unwrap().unwrap().status, AbsenceStatus::Cancelled);
        assert_eq!(h.notifications.sent().last().unwrap().template, CANCELLED_TEMPLATE);
    }

    #[test]
    fn reset_entry_is_attempted_again() {
        let h = Harness::new();
        h.service.submit(h.input("emp-1")).unwrap();
        let scheduler = h.scheduler();
        h.payroll
            .fail_with(Some(PayrollClientError::Rejected { status: 503, body: "maintenance".to_string() }));
        scheduler.tick();
        let failed = h.only_entry(OutboxStatus::Error);
        let id = failed.data["absenceRequestId"].as_str().unwrap().parse::<AbsenceRequestId>().unwrap();
        assert_eq!(h.db.find(id).unwrap().unwrap().status, AbsenceStatus::Invalid);

        h.payroll.fail_with(None);
        h.db.reset(failed.id).unwrap();
        let report = scheduler.tick();

        assert_eq!(report.done, 1);
        let done = h.only_entry(OutboxStatus::Done);
        assert_eq!(done.id, failed.id);
        assert!(done.error_message.unwrap().contains("maintenance"));
        let request = h.db.find(id).unwrap().unwrap();
        assert_eq!(request.status, AbsenceStatus::Pending);
        assert!(request.payroll_absence_id.is_some());
    }

    #[test]
    fn wrapped_task_sees_submitter_identity_on_a_pool_thread() {
        let pool = BackgroundPool::new(PoolConfig::default().with_name("propagation").with_sizes(2, 2, 10)).unwrap();
        let (tx, rx) = mpsc::channel();
        let submitter = thread::current().id();

        RequestScope::new()
            .with_identity(ExecutionContext::new("alice", 42))
            .run(|| {
                pool.spawn(move || {
                    let _ = tx.send((ContextHolder::current(), thread::current().id()));
                })
            })
            .unwrap();

        let (identity, ran_on) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(identity, ExecutionContext::new("alice", 42));
        assert_ne!(ran_on, submitter);
        pool.shutdown();
    }

    #[test]
    fn reused_pool_thread_does_not_leak_identity() {
        let pool = BackgroundPool::new(PoolConfig::default().with_name("leak").with_sizes(1, 1, 10)).unwrap();
        let (tx, rx) = mpsc::channel();

        let tx_a = tx.clone();
        RequestScope::new()
            .with_identity(ExecutionContext::new("carol", 7))
            .run(|| {
                pool.spawn(move || {
                    let _ = tx_a.send(("A", ContextHolder::current(), thread::current().id()));
                })
            })
            .unwrap();
        pool.spawn(move || {
            let _ = tx.send(("B", ContextHolder::current(), thread::current().id()));
        })
        .unwrap();

        let (label_a, identity_a, thread_a) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let (label_b, identity_b, thread_b) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((label_a, label_b), ("A", "B"));
        assert_eq!(identity_a.name, "carol");
        assert_eq!(thread_a, thread_b);
        assert_eq!(identity_b, ExecutionContext::system());
        pool.shutdown();
    }

    #[test]
    fn runtime_ticks_on_its_own_when_enabled() {
        let h = Harness::new();
        let config = AppConfig {
            outbox: OutboxConfig {
                enabled: true,
                delay: Duration::from_millis(10),
                initial_delay: Duration::ZERO,
            },
            ..AppConfig::default()
        };
        let runtime = OutboxRuntime::start(&config, h.db.clone(), h.handlers()).unwrap();
        assert!(runtime.tick_job().is_some());

        let id = h.service.submit(h.input("emp-1")).unwrap();

        assert!(wait_until(|| h.db.stats().map(|s| s.done == 1).unwrap_or(false)));
        assert!(h.db.find(id).unwrap().unwrap().payroll_absence_id.is_some());
        runtime.shutdown();
    }

    #[test]
    fn runtime_stays_idle_when_disabled() {
        let h = Harness::new();
        let runtime = OutboxRuntime::start(&AppConfig::default(), h.db.clone(), h.handlers()).unwrap();
        h.service.submit(h.input("emp-1")).unwrap();

        thread::sleep(Duration::from_millis(30));

        assert!(runtime.tick_job().is_none());
        assert_eq!(runtime.periodic().job_count(), 0);
        assert_eq!(h.db.stats().unwrap().new, 1);

        let (tx, rx) = mpsc::channel();
        RequestScope::new()
            .with_identity(ExecutionContext::new("dave", 4))
            .run(|| runtime.background().spawn(move || {
                let _ = tx.send(ContextHolder::current());
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), ExecutionContext::new("dave", 4));
        runtime.shutdown();
    }

    #[test]
    fn runtime_refuses_duplicate_handlers() {
        let h = Harness::new();
        let mut handlers = h.handlers();
        handlers.extend(h.handlers());

        let err = OutboxRuntime::start(&AppConfig::default(), h.db.clone(), handlers).err().unwrap();

        assert!(format!("{err:#}").contains("more than one handler"));
    }

    #[test]
    fn unknown_entry_id_is_not_found() {
        let h = Harness::new();
        assert!(h.db.get(OutboxEntryId::new(404)).unwrap().is_none());
        assert!(matches!(h.db.reset(OutboxEntryId::new(404)), Err(OutboxStoreError::NotFound(_))));
    }
}
