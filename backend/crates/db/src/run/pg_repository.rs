use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::checkpoint::models::Cursor;
use crate::run::models::{RunCounts, RunTrigger, SyncRun};
use crate::run::repositories::RunRepository;
use syncline_common::error::{SynclineError, SynclineResult};

const COLUMNS: &str = "id, trigger, scope, started_at, finished_at, start_cursor, end_cursor,
     pulled, applied, unchanged, skipped, record_errors, pushed, push_failed,
     discrepancies, status, error_message";

#[derive(Clone)]
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SynclineResult<SyncRun> {
        let trigger: String = row.get("trigger");
        let scope: String = row.get("scope");
        let status: String = row.get("status");
        let start_cursor: Option<i64> = row.get("start_cursor");
        let end_cursor: Option<i64> = row.get("end_cursor");
        let discrepancies: serde_json::Value = row.get("discrepancies");
        Ok(SyncRun {
            id: row.get("id"),
            trigger: trigger.parse().map_err(SynclineError::Database)?,
            scope: scope.parse().map_err(SynclineError::Database)?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            start_cursor: start_cursor.map(Cursor::new).transpose()?,
            end_cursor: end_cursor.map(Cursor::new).transpose()?,
            counts: RunCounts {
                pulled: row.get("pulled"),
                applied: row.get("applied"),
                unchanged: row.get("unchanged"),
                skipped: row.get("skipped"),
                record_errors: row.get("record_errors"),
                pushed: row.get("pushed"),
                push_failed: row.get("push_failed"),
            },
            discrepancies: serde_json::from_value(discrepancies)
                .map_err(|e| SynclineError::Database(e.to_string()))?,
            status: status.parse().map_err(SynclineError::Database)?,
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn insert(&self, run: &SyncRun) -> SynclineResult<SyncRun> {
        let discrepancies = serde_json::to_value(&run.discrepancies)
            .map_err(|e| SynclineError::Internal(e.to_string()))?;
        let row = sqlx::query(&format!(
            "insert into sync_runs ({COLUMNS})
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             returning {COLUMNS}"
        ))
        .bind(run.id)
        .bind(run.trigger.as_str())
        .bind(run.scope.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.start_cursor.map(Cursor::value))
        .bind(run.end_cursor.map(Cursor::value))
        .bind(run.counts.pulled)
        .bind(run.counts.applied)
        .bind(run.counts.unchanged)
        .bind(run.counts.skipped)
        .bind(run.counts.record_errors)
        .bind(run.counts.pushed)
        .bind(run.counts.push_failed)
        .bind(discrepancies)
        .bind(run.status.as_str())
        .bind(&run.error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn list_recent(&self, limit: i64) -> SynclineResult<Vec<SyncRun>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from sync_runs order by started_at desc limit $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn latest_of(&self, triggers: &[RunTrigger]) -> SynclineResult<Option<SyncRun>> {
        let names: Vec<String> = triggers.iter().map(|t| t.as_str().to_owned()).collect();
        let row = sqlx::query(&format!(
            "select {COLUMNS} from sync_runs
             where trigger = any($1)
             order by started_at desc
             limit 1"
        ))
        .bind(names)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }
}
