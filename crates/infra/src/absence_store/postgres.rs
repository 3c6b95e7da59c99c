//! Postgres-backed absence requests.
//!
//! `submit` and `cancel` write the request row and its outbox entry in one
//! transaction. The [`AbsenceRequestRepository`] impl is synchronous and
//! blocks on the runtime handle, like [`crate::outbox::PostgresOutboxStore`].

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{info, instrument};
use uuid::Uuid;

use workforce_absence::{AbsenceRequest, AbsenceStatus, NewAbsenceRequest};
use workforce_context::ContextHolder;
use workforce_core::{AbsenceRequestId, OutboxEntryId, UserId};

use super::{AbsenceRequestRepository, RepositoryError};
use crate::absence_service::{AbsenceServiceError, Cancellation};
use crate::outbox::postgres::PostgresOutboxStore;
use crate::outbox::types::{NewOutboxEntry, Operation};

const SELECT_COLUMNS: &str = r#"
    SELECT id, employee_id, approver_id, employee_payroll_id, absence_type_payroll_id,
           start_date, end_date, half_day_start, half_day_end, comment, status,
           payroll_absence_id, created_at
    FROM absence_requests
"#;

pub struct PostgresAbsenceStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresAbsenceStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Insert a pending request and its `CREATE_ABSENCE_REQUEST` entry.
    #[instrument(skip(self, input))]
    pub async fn submit(&self, input: NewAbsenceRequest) -> Result<AbsenceRequest, AbsenceServiceError> {
        let request = AbsenceRequest::create(AbsenceRequestId::new(), input, Utc::now())?;

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query(
            r#"
            INSERT INTO absence_requests (
                id, employee_id, approver_id, employee_payroll_id, absence_type_payroll_id,
                start_date, end_date, half_day_start, half_day_end, comment, status,
                payroll_absence_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.employee_id.as_uuid())
        .bind(request.approver_id.map(|id| *id.as_uuid()))
        .bind(&request.employee_payroll_id)
        .bind(&request.absence_type_payroll_id)
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(request.half_day_start)
        .bind(request.half_day_end)
        .bind(&request.comment)
        .bind(request.status.as_str())
        .bind(&request.payroll_absence_id)
        .bind(request.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("submit", e))?;

        let entry_id = PostgresOutboxStore::insert(
            &mut tx,
            NewOutboxEntry::for_absence_request(Operation::CreateAbsenceRequest, request.id),
        )
        .await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        info!(
            absence_request_id = %request.id,
            entry_id = %entry_id,
            actor = %ContextHolder::current(),
            "absence request submitted"
        );
        Ok(request)
    }

    /// Cancel a request; queue a `CANCEL_ABSENCE_REQUEST` entry if payroll already has it.
    #[instrument(skip(self), fields(absence_request_id = %id))]
    pub async fn cancel(&self, id: AbsenceRequestId) -> Result<Cancellation, AbsenceServiceError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

        let mut request = Self::load_for_update(&mut tx, id)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;
        request.cancel()?;

        sqlx::query("UPDATE absence_requests SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(request.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("cancel", e))?;

        let outbox_entry: Option<OutboxEntryId> = if request.is_synced() {
            Some(
                PostgresOutboxStore::insert(
                    &mut tx,
                    NewOutboxEntry::for_absence_request(Operation::CancelAbsenceRequest, id),
                )
                .await?,
            )
        } else {
            None
        };

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        info!(entry_id = ?outbox_entry, actor = %ContextHolder::current(), "absence request cancelled");
        Ok(Cancellation {
            status: request.status,
            outbox_entry,
        })
    }

    async fn load_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: AbsenceRequestId,
    ) -> Result<Option<AbsenceRequest>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, AbsenceRequestRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_for_update", e))?;

        row.map(AbsenceRequest::try_from).transpose()
    }

    async fn update_one(&self, operation: &str, sql: &str, id: AbsenceRequestId, value: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(sql)
            .bind(id.as_uuid())
            .bind(value)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}

impl AbsenceRequestRepository for PostgresAbsenceStore {
    fn find(&self, id: AbsenceRequestId) -> Result<Option<AbsenceRequest>, RepositoryError> {
        self.runtime.block_on(async {
            let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
            let row = sqlx::query_as::<_, AbsenceRequestRow>(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find", e))?;

            row.map(AbsenceRequest::try_from).transpose()
        })
    }

    fn update_status(&self, id: AbsenceRequestId, status: AbsenceStatus) -> Result<(), RepositoryError> {
        self.runtime.block_on(self.update_one(
            "update_status",
            "UPDATE absence_requests SET status = $2 WHERE id = $1",
            id,
            status.as_str(),
        ))
    }

    fn record_payroll_id(&self, id: AbsenceRequestId, payroll_absence_id: &str) -> Result<(), RepositoryError> {
        self.runtime.block_on(self.update_one(
            "record_payroll_id",
            "UPDATE absence_requests SET payroll_absence_id = $2 WHERE id = $1",
            id,
            payroll_absence_id,
        ))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            RepositoryError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => RepositoryError::Storage(format!("connection pool closed in {}", operation)),
        _ => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

struct AbsenceRequestRow {
    id: Uuid,
    employee_id: Uuid,
    approver_id: Option<Uuid>,
    employee_payroll_id: Option<String>,
    absence_type_payroll_id: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    half_day_start: bool,
    half_day_end: bool,
    comment: Option<String>,
    status: String,
    payroll_absence_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AbsenceRequestRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AbsenceRequestRow {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            approver_id: row.try_get("approver_id")?,
            employee_payroll_id: row.try_get("employee_payroll_id")?,
            absence_type_payroll_id: row.try_get("absence_type_payroll_id")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            half_day_start: row.try_get("half_day_start")?,
            half_day_end: row.try_get("half_day_end")?,
            comment: row.try_get("comment")?,
            status: row.try_get("status")?,
            payroll_absence_id: row.try_get("payroll_absence_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<AbsenceRequestRow> for AbsenceRequest {
    type Error = RepositoryError;

    fn try_from(row: AbsenceRequestRow) -> Result<Self, Self::Error> {
        Ok(AbsenceRequest {
            id: AbsenceRequestId::from_uuid(row.id),
            employee_id: UserId::from_uuid(row.employee_id),
            approver_id: row.approver_id.map(UserId::from_uuid),
            employee_payroll_id: row.employee_payroll_id,
            absence_type_payroll_id: row.absence_type_payroll_id,
            start_date: row.start_date,
            end_date: row.end_date,
            half_day_start: row.half_day_start,
            half_day_end: row.half_day_end,
            comment: row.comment,
            status: AbsenceStatus::parse(&row.status).map_err(|e| RepositoryError::Storage(e.to_string()))?,
            payroll_absence_id: row.payroll_absence_id,
            created_at: row.created_at,
        })
    }
}
