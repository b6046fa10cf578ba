use async_trait::async_trait;

use crate::invoice::models::{InvoiceRecord, UpsertOutcome};
use syncline_common::error::SynclineResult;

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Insert or update by `external_id`. Idempotent: re-delivery of the same
    /// record is `Unchanged`; amount is never rewritten and status only
    /// moves forward.
    async fn upsert(&self, invoice: &InvoiceRecord) -> SynclineResult<UpsertOutcome>;

    async fn get(&self, external_id: &str) -> SynclineResult<Option<InvoiceRecord>>;

    /// Every stored invoice, ordered by sequence.
    async fn list_all(&self) -> SynclineResult<Vec<InvoiceRecord>>;
}
