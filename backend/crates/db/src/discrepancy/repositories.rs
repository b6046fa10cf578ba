use async_trait::async_trait;

use crate::discrepancy::models::{DiscrepancyKey, OpenDiscrepancy, ReconciliationDiscrepancy};
use syncline_common::error::SynclineResult;

#[async_trait]
pub trait DiscrepancyRepository: Send + Sync {
    /// Unresolved ledger rows.
    async fn list_open(&self) -> SynclineResult<Vec<OpenDiscrepancy>>;

    /// Write the current state of a detected discrepancy into the ledger,
    /// opening a row if the key has none. `raised` marks an alert going out
    /// for it now (bumps `raise_count` and `last_raised_at`).
    async fn record(
        &self,
        discrepancy: &ReconciliationDiscrepancy,
        raised: bool,
    ) -> SynclineResult<OpenDiscrepancy>;

    /// Close the open row for `key`. Returns `false` if none was open.
    async fn mark_resolved(&self, key: &DiscrepancyKey) -> SynclineResult<bool>;
}
