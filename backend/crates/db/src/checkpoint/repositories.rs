use async_trait::async_trait;

use crate::checkpoint::models::{Cursor, SyncCheckpoint};
use syncline_common::error::SynclineResult;

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn get(&self, stream: &str) -> SynclineResult<Option<SyncCheckpoint>>;

    /// Get or create the checkpoint for a stream, starting at `Cursor::EPOCH`.
    async fn get_or_create(&self, stream: &str) -> SynclineResult<SyncCheckpoint>;

    /// Atomically set status to 'running' unless a live run already holds it.
    /// A lock older than `stale_after` is taken over.
    /// Returns `None` if the lock was not acquired.
    async fn acquire_lock(
        &self,
        stream: &str,
        stale_after: chrono::Duration,
    ) -> SynclineResult<Option<SyncCheckpoint>>;

    /// Advance the cursor and release the lock in one atomic write.
    /// Fails with `Validation` if `cursor` is behind the stored cursor.
    async fn commit(&self, stream: &str, cursor: Cursor) -> SynclineResult<SyncCheckpoint>;

    /// Release the lock without moving the cursor. `Some(error)` marks the
    /// stream failed.
    async fn release(
        &self,
        stream: &str,
        error_message: Option<&str>,
    ) -> SynclineResult<SyncCheckpoint>;
}
