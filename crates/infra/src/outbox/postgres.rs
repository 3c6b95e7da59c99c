//! Postgres-backed outbox store.
//!
//! Inserts are async and take the caller's transaction so the entry commits
//! or rolls back together with the domain row. The scheduler-facing
//! [`OutboxStore`] impl is synchronous and blocks on the runtime handle it
//! was built with; call it from scheduler threads, never from inside an
//! async task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{instrument, warn};

use workforce_core::OutboxEntryId;

use super::store::{OutboxStore, OutboxStoreError, Transition};
use super::types::{NewOutboxEntry, OutboxEntry, OutboxStats, OutboxStatus};

/// Schema for the absence and outbox tables.
pub const SCHEMA: &str = include_str!("../../migrations/0001_absence_outbox.sql");

/// Create the tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), OutboxStoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a `NEW` entry inside the caller's transaction.
    #[instrument(skip(tx, entry), fields(operation = %entry.operation))]
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        entry: NewOutboxEntry,
    ) -> Result<OutboxEntryId, OutboxStoreError> {
        entry.check().map_err(OutboxStoreError::Constraint)?;

        let row = sqlx::query(
            r#"
            INSERT INTO outbox_entries (operation, status, data)
            VALUES ($1, 'NEW', $2)
            RETURNING id
            "#,
        )
        .bind(entry.operation.as_str())
        .bind(&entry.data)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("insert", e))?;
        Ok(OutboxEntryId::new(id))
    }

    async fn finish(
        &self,
        id: OutboxEntryId,
        target: OutboxStatus,
        message: Option<&str>,
    ) -> Result<Transition, OutboxStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = $2,
                synced_at = now(),
                error_message = COALESCE($3, error_message)
            WHERE id = $1 AND status = 'NEW'
            "#,
        )
        .bind(id.value())
        .bind(target.as_str())
        .bind(message)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish", e))?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }

        match self.status_of(id).await? {
            None => Err(OutboxStoreError::NotFound(id)),
            Some(status) => {
                warn!(entry_id = %id, status = %status, target = %target, "outbox entry already terminal; ignoring update");
                Ok(Transition::AlreadyTerminal(status))
            }
        }
    }

    async fn status_of(&self, id: OutboxEntryId) -> Result<Option<OutboxStatus>, OutboxStoreError> {
        let row = sqlx::query("SELECT status FROM outbox_entries WHERE id = $1")
            .bind(id.value())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("status_of", e))?;

        row.map(|row| {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("status_of", e))?;
            status
                .parse::<OutboxStatus>()
                .map_err(|e| OutboxStoreError::Storage(e.to_string()))
        })
        .transpose()
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn find_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query_as::<_, OutboxEntryRow>(
                r#"
                SELECT id, operation, status, data, created_at, synced_at, error_message
                FROM outbox_entries
                WHERE status = $1
                ORDER BY id ASC
                "#,
            )
            .bind(status.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_status", e))?;

            rows.into_iter().map(OutboxEntry::try_from).collect()
        })
    }

    fn get(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, OutboxStoreError> {
        self.runtime.block_on(async {
            let row = sqlx::query_as::<_, OutboxEntryRow>(
                r#"
                SELECT id, operation, status, data, created_at, synced_at, error_message
                FROM outbox_entries
                WHERE id = $1
                "#,
            )
            .bind(id.value())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

            row.map(OutboxEntry::try_from).transpose()
        })
    }

    fn mark_done(&self, id: OutboxEntryId) -> Result<Transition, OutboxStoreError> {
        self.runtime.block_on(self.finish(id, OutboxStatus::Done, None))
    }

    fn mark_error(&self, id: OutboxEntryId, message: &str) -> Result<Transition, OutboxStoreError> {
        self.runtime.block_on(self.finish(id, OutboxStatus::Error, Some(message)))
    }

    fn reset(&self, id: OutboxEntryId) -> Result<(), OutboxStoreError> {
        self.runtime.block_on(async {
            let result = sqlx::query(
                r#"
                UPDATE outbox_entries
                SET status = 'NEW', synced_at = NULL
                WHERE id = $1 AND status = 'ERROR'
                "#,
            )
            .bind(id.value())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reset", e))?;

            if result.rows_affected() == 1 {
                return Ok(());
            }
            match self.status_of(id).await? {
                None => Err(OutboxStoreError::NotFound(id)),
                Some(from) => Err(OutboxStoreError::InvalidTransition {
                    id,
                    from,
                    to: OutboxStatus::New,
                }),
            }
        })
    }

    fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM outbox_entries GROUP BY status")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("stats", e))?;

            let mut stats = OutboxStats::default();
            for row in rows {
                let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
                let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
                let n = usize::try_from(n).unwrap_or_default();
                match status.parse::<OutboxStatus>() {
                    Ok(OutboxStatus::New) => stats.new = n,
                    Ok(OutboxStatus::Done) => stats.done = n,
                    Ok(OutboxStatus::Error) => stats.error = n,
                    Err(e) => return Err(OutboxStoreError::Storage(e.to_string())),
                }
            }
            Ok(stats)
        })
    }
}

/// Map sqlx errors to outbox store errors.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique, foreign key, check
                Some("23505") | Some("23503") | Some("23514") => OutboxStoreError::Constraint(msg),
                _ => OutboxStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => OutboxStoreError::Storage(format!("connection pool closed in {}", operation)),
        _ => OutboxStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

struct OutboxEntryRow {
    id: i64,
    operation: String,
    status: String,
    data: JsonValue,
    created_at: DateTime<Utc>,
    synced_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OutboxEntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxEntryRow {
            id: row.try_get("id")?,
            operation: row.try_get("operation")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            synced_at: row.try_get("synced_at")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

impl TryFrom<OutboxEntryRow> for OutboxEntry {
    type Error = OutboxStoreError;

    fn try_from(row: OutboxEntryRow) -> Result<Self, Self::Error> {
        Ok(OutboxEntry {
            id: OutboxEntryId::new(row.id),
            operation: row
                .operation
                .parse()
                .map_err(|e: workforce_core::DomainError| OutboxStoreError::Storage(e.to_string()))?,
            status: row
                .status
                .parse()
                .map_err(|e: workforce_core::DomainError| OutboxStoreError::Storage(e.to_string()))?,
            data: row.data,
            created_at: row.created_at,
            synced_at: row.synced_at,
            error_message: row.error_message,
        })
    }
}
