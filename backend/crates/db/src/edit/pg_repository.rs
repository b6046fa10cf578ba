use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::edit::models::{attempts_limit, SalesDateEdit};
use crate::edit::repositories::EditRepository;
use syncline_common::error::{SynclineError, SynclineResult};

const COLUMNS: &str = "id, opportunity_id, field, previous_value, new_value, origin_user,
     submitted_at, state, attempts, next_attempt_at, last_error, erp_reference,
     acknowledged_at, alerted_at";

#[derive(Clone)]
pub struct PgEditRepository {
    pool: PgPool,
}

impl PgEditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SynclineResult<SalesDateEdit> {
        let field: String = row.get("field");
        let state: String = row.get("state");
        Ok(SalesDateEdit {
            id: row.get("id"),
            opportunity_id: row.get("opportunity_id"),
            field: field.parse().map_err(SynclineError::Database)?,
            previous_value: row.get("previous_value"),
            new_value: row.get("new_value"),
            origin_user: row.get("origin_user"),
            submitted_at: row.get("submitted_at"),
            state: state.parse().map_err(SynclineError::Database)?,
            attempts: row.get("attempts"),
            next_attempt_at: row.get("next_attempt_at"),
            last_error: row.get("last_error"),
            erp_reference: row.get("erp_reference"),
            acknowledged_at: row.get("acknowledged_at"),
            alerted_at: row.get("alerted_at"),
        })
    }

    fn expect_row(
        row: Option<sqlx::postgres::PgRow>,
        id: Uuid,
    ) -> SynclineResult<SalesDateEdit> {
        match row {
            Some(r) => Self::map_row(r),
            None => Err(SynclineError::NotFound(format!("sales-date edit {id}"))),
        }
    }
}

#[async_trait]
impl EditRepository for PgEditRepository {
    async fn submit(&self, edit: &SalesDateEdit) -> SynclineResult<SalesDateEdit> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SynclineError::Database(e.to_string()))?;

        let superseded = sqlx::query(
            "update sales_date_edits
             set state = 'superseded', next_attempt_at = null
             where opportunity_id = $1 and field = $2 and id != $3
               and state in ('pending', 'sent', 'failed') and alerted_at is null
             returning previous_value, submitted_at",
        )
        .bind(&edit.opportunity_id)
        .bind(edit.field.as_str())
        .bind(edit.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        let previous_value = superseded
            .iter()
            .min_by_key(|r| r.get::<DateTime<Utc>, _>("submitted_at"))
            .map_or(edit.previous_value, |r| r.get("previous_value"));

        let row = sqlx::query(&format!(
            "insert into sales_date_edits
             (id, opportunity_id, field, previous_value, new_value, origin_user, submitted_at,
              state, attempts, next_attempt_at, last_error, erp_reference, acknowledged_at, alerted_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             returning {COLUMNS}"
        ))
        .bind(edit.id)
        .bind(&edit.opportunity_id)
        .bind(edit.field.as_str())
        .bind(previous_value)
        .bind(edit.new_value)
        .bind(&edit.origin_user)
        .bind(edit.submitted_at)
        .bind(edit.state.as_str())
        .bind(edit.attempts)
        .bind(edit.next_attempt_at)
        .bind(&edit.last_error)
        .bind(&edit.erp_reference)
        .bind(edit.acknowledged_at)
        .bind(edit.alerted_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| SynclineError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn get(&self, id: Uuid) -> SynclineResult<Option<SalesDateEdit>> {
        let row = sqlx::query(&format!("select {COLUMNS} from sales_date_edits where id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> SynclineResult<Vec<SalesDateEdit>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from sales_date_edits
             where (state in ('pending', 'sent')
                    or (state = 'failed' and alerted_at is null and attempts < $1))
               and (next_attempt_at is null or next_attempt_at <= $2)
             order by submitted_at, id"
        ))
        .bind(attempts_limit(max_attempts))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn mark_sent(&self, id: Uuid) -> SynclineResult<SalesDateEdit> {
        let row = sqlx::query(&format!(
            "update sales_date_edits
             set state = 'sent'
             where id = $1 and state in ('pending', 'sent', 'failed')
             returning {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Self::expect_row(row, id)
    }

    async fn mark_acknowledged(
        &self,
        id: Uuid,
        erp_reference: Option<&str>,
    ) -> SynclineResult<Option<SalesDateEdit>> {
        let row = sqlx::query(&format!(
            "update sales_date_edits
             set state = 'acknowledged', erp_reference = $1, acknowledged_at = $2,
                 next_attempt_at = null, last_error = null
             where id = $3 and state = 'sent'
             returning {COLUMNS}"
        ))
        .bind(erp_reference)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> SynclineResult<Option<SalesDateEdit>> {
        let row = sqlx::query(&format!(
            "update sales_date_edits
             set state = 'failed', attempts = attempts + 1, last_error = $1,
                 next_attempt_at = $2
             where id = $3 and state = 'sent'
             returning {COLUMNS}"
        ))
        .bind(error)
        .bind(next_attempt_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn mark_exhausted(&self, id: Uuid, error: &str) -> SynclineResult<bool> {
        let result = sqlx::query(
            "update sales_date_edits
             set state = 'failed', last_error = $1, next_attempt_at = null, alerted_at = $2
             where id = $3 and state in ('sent', 'failed') and alerted_at is null",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_conflict(&self, id: Uuid, error: &str) -> SynclineResult<bool> {
        let result = sqlx::query(
            "update sales_date_edits
             set state = 'conflict', last_error = $1, next_attempt_at = null, alerted_at = $2
             where id = $3 and state = 'sent' and alerted_at is null",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}
