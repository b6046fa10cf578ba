use async_trait::async_trait;

use crate::run::models::{RunTrigger, SyncRun};
use syncline_common::error::SynclineResult;

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert(&self, run: &SyncRun) -> SynclineResult<SyncRun>;

    /// Newest first.
    async fn list_recent(&self, limit: i64) -> SynclineResult<Vec<SyncRun>>;

    /// Most recently started run with one of `triggers`.
    async fn latest_of(&self, triggers: &[RunTrigger]) -> SynclineResult<Option<SyncRun>>;
}
