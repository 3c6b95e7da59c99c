//! Standalone outbox worker: Postgres-backed stores, periodic tick, and a
//! background pool, running until Ctrl-C.
//!
//! No real payroll or notification provider is wired here; the worker uses
//! the in-process sandbox implementations and says so at startup.

use std::sync::Arc;

use anyhow::Context as _;
use sqlx::PgPool;
use tokio::runtime::Handle;

use workforce_infra::absence_store::{AbsenceRequestRepository, PostgresAbsenceStore};
use workforce_infra::external::{
    InMemoryDirectory, InMemoryPayrollClient, LoggingNotificationService, NotificationService, PayrollClient,
    StakeholderDirectory,
};
use workforce_infra::outbox::{
    ensure_schema, CancelAbsenceRequestHandler, CreateAbsenceRequestHandler, OperationHandler, PostgresOutboxStore,
    StakeholderNotifier,
};
use workforce_infra::{AppConfig, OutboxRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    workforce_observability::init();

    let config = AppConfig::from_env().context("reading configuration")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = PgPool::connect(&database_url).await.context("connecting to Postgres")?;
    ensure_schema(&pool).await.context("applying schema")?;

    tracing::warn!("no payroll provider configured; using the in-process sandbox client");
    let payroll: Arc<dyn PayrollClient> = Arc::new(InMemoryPayrollClient::new());
    let directory: Arc<dyn StakeholderDirectory> = Arc::new(InMemoryDirectory::new());
    let notifications: Arc<dyn NotificationService> = Arc::new(LoggingNotificationService::new());

    let repository: Arc<dyn AbsenceRequestRepository> =
        Arc::new(PostgresAbsenceStore::new(pool.clone(), Handle::current()));
    let handlers: Vec<Arc<dyn OperationHandler>> = vec![
        Arc::new(CreateAbsenceRequestHandler::new(
            Arc::clone(&repository),
            Arc::clone(&payroll),
            StakeholderNotifier::new(Arc::clone(&directory), Arc::clone(&notifications)),
        )),
        Arc::new(CancelAbsenceRequestHandler::new(
            repository,
            payroll,
            StakeholderNotifier::new(directory, notifications),
        )),
    ];

    let store = PostgresOutboxStore::new(pool, Handle::current());
    let runtime = OutboxRuntime::start(&config, store, handlers)?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");

    // Pool threads may be inside a blocking store call on this runtime.
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .context("joining shutdown")?;
    Ok(())
}
