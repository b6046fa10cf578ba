use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::checkpoint::models::{CheckpointStatus, Cursor, SyncCheckpoint};
use crate::checkpoint::repositories::CheckpointRepository;
use syncline_common::error::{SynclineError, SynclineResult};

const COLUMNS: &str =
    "id, stream, cursor_value, last_committed_at, status, error_message, locked_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SynclineResult<SyncCheckpoint> {
        let status: String = row.get("status");
        Ok(SyncCheckpoint {
            id: row.get("id"),
            stream: row.get("stream"),
            cursor: Cursor::new(row.get("cursor_value"))?,
            last_committed_at: row.get("last_committed_at"),
            status: status.parse().map_err(SynclineError::Database)?,
            error_message: row.get("error_message"),
            locked_at: row.get("locked_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn get(&self, stream: &str) -> SynclineResult<Option<SyncCheckpoint>> {
        let row = sqlx::query(&format!(
            "select {COLUMNS} from sync_checkpoints where stream = $1"
        ))
        .bind(stream)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn get_or_create(&self, stream: &str) -> SynclineResult<SyncCheckpoint> {
        let row = sqlx::query(&format!(
            "insert into sync_checkpoints (id, stream, cursor_value, status)
             values ($1, $2, 0, 'idle')
             on conflict (stream) do update set updated_at = now()
             returning {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(stream)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn acquire_lock(
        &self,
        stream: &str,
        stale_after: chrono::Duration,
    ) -> SynclineResult<Option<SyncCheckpoint>> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "update sync_checkpoints
             set status = 'running', error_message = null, locked_at = $1, updated_at = $1
             where stream = $2
               and (status != 'running' or locked_at is null or locked_at <= $3)
             returning {COLUMNS}"
        ))
        .bind(now)
        .bind(stream)
        .bind(now - stale_after)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn commit(&self, stream: &str, cursor: Cursor) -> SynclineResult<SyncCheckpoint> {
        let now = Utc::now();
        // Single statement: readers see the old row or the new row.
        let row = sqlx::query(&format!(
            "update sync_checkpoints
             set cursor_value = $1, last_committed_at = $2, status = 'idle',
                 error_message = null, locked_at = null, updated_at = $2
             where stream = $3 and cursor_value <= $1
             returning {COLUMNS}"
        ))
        .bind(cursor.value())
        .bind(now)
        .bind(stream)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => match self.get(stream).await? {
                Some(current) => Err(SynclineError::Validation(format!(
                    "refusing to move {stream} checkpoint back from {} to {cursor}",
                    current.cursor
                ))),
                None => Err(SynclineError::NotFound(format!("checkpoint {stream}"))),
            },
        }
    }

    async fn release(
        &self,
        stream: &str,
        error_message: Option<&str>,
    ) -> SynclineResult<SyncCheckpoint> {
        let status = match error_message {
            Some(_) => CheckpointStatus::Failed,
            None => CheckpointStatus::Idle,
        };
        let row = sqlx::query(&format!(
            "update sync_checkpoints
             set status = $1, error_message = $2, locked_at = null, updated_at = $3
             where stream = $4
             returning {COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .bind(stream)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(SynclineError::NotFound(format!("checkpoint {stream}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, ensure_schema};

    async fn test_repo() -> Option<PgCheckpointRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some(PgCheckpointRepository::new(pool))
    }

    fn unique_stream() -> String {
        format!("test-{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn get_or_create_starts_at_epoch() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        let cp = repo.get_or_create(&stream).await.expect("should work");
        assert_eq!(cp.stream, stream);
        assert_eq!(cp.cursor, Cursor::EPOCH);
        assert_eq!(cp.status, CheckpointStatus::Idle);
        assert!(cp.last_committed_at.is_none());
    }

    #[tokio::test]
    async fn get_or_create_returns_existing() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        let first = repo.get_or_create(&stream).await.expect("first");
        let second = repo.get_or_create(&stream).await.expect("second");
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn acquire_lock_fails_when_already_running() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        repo.get_or_create(&stream).await.expect("create");
        let first = repo
            .acquire_lock(&stream, chrono::Duration::hours(1))
            .await
            .expect("first lock");
        assert!(first.is_some());
        let second = repo
            .acquire_lock(&stream, chrono::Duration::hours(1))
            .await
            .expect("second lock");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn acquire_lock_takes_over_stale_lock() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        repo.get_or_create(&stream).await.expect("create");
        repo.acquire_lock(&stream, chrono::Duration::hours(1))
            .await
            .expect("first lock");
        let taken = repo
            .acquire_lock(&stream, chrono::Duration::zero())
            .await
            .expect("takeover");
        assert!(taken.is_some());
    }

    #[tokio::test]
    async fn commit_advances_and_releases() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        repo.get_or_create(&stream).await.expect("create");
        repo.acquire_lock(&stream, chrono::Duration::hours(1))
            .await
            .expect("lock")
            .expect("should acquire");
        let cp = repo
            .commit(&stream, Cursor::new(120).unwrap())
            .await
            .expect("commit");
        assert_eq!(cp.cursor.value(), 120);
        assert_eq!(cp.status, CheckpointStatus::Idle);
        assert!(cp.last_committed_at.is_some());
        assert!(cp.locked_at.is_none());
    }

    #[tokio::test]
    async fn commit_refuses_to_move_backwards() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        repo.get_or_create(&stream).await.expect("create");
        repo.commit(&stream, Cursor::new(50).unwrap())
            .await
            .expect("commit 50");
        let err = repo
            .commit(&stream, Cursor::new(10).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SynclineError::Validation(_)));

        let cp = repo.get(&stream).await.expect("get").expect("exists");
        assert_eq!(cp.cursor.value(), 50);
    }

    #[tokio::test]
    async fn release_with_error_keeps_cursor() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let stream = unique_stream();
        repo.get_or_create(&stream).await.expect("create");
        repo.commit(&stream, Cursor::new(5).unwrap())
            .await
            .expect("commit");
        repo.acquire_lock(&stream, chrono::Duration::hours(1))
            .await
            .expect("lock");
        let cp = repo
            .release(&stream, Some("erp authentication failed"))
            .await
            .expect("release");
        assert_eq!(cp.status, CheckpointStatus::Failed);
        assert_eq!(cp.cursor.value(), 5);
        assert_eq!(cp.error_message.as_deref(), Some("erp authentication failed"));
    }
}
