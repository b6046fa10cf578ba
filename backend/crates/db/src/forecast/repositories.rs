use async_trait::async_trait;
use chrono::NaiveDate;

use crate::forecast::models::OpportunityForecast;
use syncline_common::error::SynclineResult;

#[async_trait]
pub trait ForecastRepository: Send + Sync {
    async fn get(&self, opportunity_id: &str) -> SynclineResult<Option<OpportunityForecast>>;

    async fn upsert(&self, forecast: &OpportunityForecast) -> SynclineResult<OpportunityForecast>;

    /// Forecasts that take part in reconciliation (stage is not lost).
    async fn list_active(&self) -> SynclineResult<Vec<OpportunityForecast>>;

    /// Apply a CRM-side close-date edit to the forecast.
    async fn set_expected_date(
        &self,
        opportunity_id: &str,
        expected_date: NaiveDate,
    ) -> SynclineResult<OpportunityForecast>;
}
