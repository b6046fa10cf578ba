use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Row};

use crate::forecast::models::OpportunityForecast;
use crate::forecast::repositories::ForecastRepository;
use syncline_common::error::{SynclineError, SynclineResult};

const COLUMNS: &str =
    "opportunity_id, name, forecast_amount, expected_date, tolerance_pct, stage, updated_at";

#[derive(Clone)]
pub struct PgForecastRepository {
    pool: PgPool,
}

impl PgForecastRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SynclineResult<OpportunityForecast> {
        let stage: String = row.get("stage");
        Ok(OpportunityForecast {
            opportunity_id: row.get("opportunity_id"),
            name: row.get("name"),
            forecast_amount: row.get("forecast_amount"),
            expected_date: row.get("expected_date"),
            tolerance_pct: row.get("tolerance_pct"),
            stage: stage.parse().map_err(SynclineError::Database)?,
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ForecastRepository for PgForecastRepository {
    async fn get(&self, opportunity_id: &str) -> SynclineResult<Option<OpportunityForecast>> {
        let row = sqlx::query(&format!(
            "select {COLUMNS} from opportunity_forecasts where opportunity_id = $1"
        ))
        .bind(opportunity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn upsert(&self, forecast: &OpportunityForecast) -> SynclineResult<OpportunityForecast> {
        let row = sqlx::query(&format!(
            "insert into opportunity_forecasts
             (opportunity_id, name, forecast_amount, expected_date, tolerance_pct, stage, updated_at)
             values ($1, $2, $3, $4, $5, $6, $7)
             on conflict (opportunity_id) do update set
               name = excluded.name,
               forecast_amount = excluded.forecast_amount,
               expected_date = excluded.expected_date,
               tolerance_pct = excluded.tolerance_pct,
               stage = excluded.stage,
               updated_at = excluded.updated_at
             returning {COLUMNS}"
        ))
        .bind(&forecast.opportunity_id)
        .bind(&forecast.name)
        .bind(forecast.forecast_amount)
        .bind(forecast.expected_date)
        .bind(forecast.tolerance_pct)
        .bind(forecast.stage.as_str())
        .bind(forecast.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn list_active(&self) -> SynclineResult<Vec<OpportunityForecast>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from opportunity_forecasts
             where stage != 'lost'
             order by opportunity_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn set_expected_date(
        &self,
        opportunity_id: &str,
        expected_date: NaiveDate,
    ) -> SynclineResult<OpportunityForecast> {
        let row = sqlx::query(&format!(
            "update opportunity_forecasts
             set expected_date = $1, updated_at = $2
             where opportunity_id = $3
             returning {COLUMNS}"
        ))
        .bind(expected_date)
        .bind(Utc::now())
        .bind(opportunity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(SynclineError::NotFound(format!(
                "opportunity {opportunity_id}"
            ))),
        }
    }
}
