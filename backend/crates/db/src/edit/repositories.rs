use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::edit::models::SalesDateEdit;
use syncline_common::error::SynclineResult;

#[async_trait]
pub trait EditRepository: Send + Sync {
    /// Store a new pending edit. Older unacknowledged edits for the same
    /// opportunity and field become `superseded`, and the oldest of them
    /// hands its `previous_value` to the new edit: the ERP still holds that
    /// value, not the one a superseded edit was going to write.
    async fn submit(&self, edit: &SalesDateEdit) -> SynclineResult<SalesDateEdit>;

    async fn get(&self, id: Uuid) -> SynclineResult<Option<SalesDateEdit>>;

    /// Non-terminal edits whose backoff has elapsed, oldest first.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> SynclineResult<Vec<SalesDateEdit>>;

    async fn mark_sent(&self, id: Uuid) -> SynclineResult<SalesDateEdit>;

    /// Settle a `sent` edit as delivered. `None` when the edit left `sent`
    /// while its push was in flight, e.g. a newer edit superseded it.
    async fn mark_acknowledged(
        &self,
        id: Uuid,
        erp_reference: Option<&str>,
    ) -> SynclineResult<Option<SalesDateEdit>>;

    /// Count a failed attempt on a `sent` edit and schedule the next one.
    /// `None` when the edit is no longer `sent`.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> SynclineResult<Option<SalesDateEdit>>;

    /// Move a `sent` or `failed` edit to terminal `failed`. Returns `true`
    /// only for the call that stamped `alerted_at`, so an alert goes out once.
    async fn mark_exhausted(&self, id: Uuid, error: &str) -> SynclineResult<bool>;

    /// Move a `sent` edit to `conflict`. Same once-only contract as
    /// `mark_exhausted`.
    async fn mark_conflict(&self, id: Uuid, error: &str) -> SynclineResult<bool>;
}
