use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::discrepancy::models::{DiscrepancyKey, OpenDiscrepancy, ReconciliationDiscrepancy};
use crate::discrepancy::repositories::DiscrepancyRepository;
use syncline_common::error::{SynclineError, SynclineResult};

const COLUMNS: &str = "id, kind, opportunity_id, invoice_key, forecast_amount, actual_amount,
     delta, age_days, severity, detected_on, first_raised_at, last_raised_at, raise_count,
     resolved_at";

/// `invoice_key` is `''` for opportunity-level findings so the partial unique
/// index can cover every key.
fn invoice_key(invoice_id: &Option<String>) -> &str {
    invoice_id.as_deref().unwrap_or("")
}

#[derive(Clone)]
pub struct PgDiscrepancyRepository {
    pool: PgPool,
}

impl PgDiscrepancyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SynclineResult<OpenDiscrepancy> {
        let kind: String = row.get("kind");
        let severity: String = row.get("severity");
        let invoice_key: String = row.get("invoice_key");
        Ok(OpenDiscrepancy {
            id: row.get("id"),
            discrepancy: ReconciliationDiscrepancy {
                kind: kind.parse().map_err(SynclineError::Database)?,
                opportunity_id: row.get("opportunity_id"),
                invoice_id: Some(invoice_key).filter(|k| !k.is_empty()),
                forecast_amount: row.get("forecast_amount"),
                actual_amount: row.get("actual_amount"),
                delta: row.get("delta"),
                age_days: row.get("age_days"),
                severity: severity.parse().map_err(SynclineError::Database)?,
                detected_on: row.get("detected_on"),
            },
            first_raised_at: row.get("first_raised_at"),
            last_raised_at: row.get("last_raised_at"),
            raise_count: row.get("raise_count"),
            resolved_at: row.get("resolved_at"),
        })
    }
}

#[async_trait]
impl DiscrepancyRepository for PgDiscrepancyRepository {
    async fn list_open(&self) -> SynclineResult<Vec<OpenDiscrepancy>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from reconciliation_discrepancies
             where resolved_at is null
             order by kind, opportunity_id, invoice_key"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn record(
        &self,
        discrepancy: &ReconciliationDiscrepancy,
        raised: bool,
    ) -> SynclineResult<OpenDiscrepancy> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "insert into reconciliation_discrepancies
             (id, kind, opportunity_id, invoice_key, forecast_amount, actual_amount, delta,
              age_days, severity, detected_on, first_raised_at, last_raised_at, raise_count)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, 1)
             on conflict (kind, opportunity_id, invoice_key) where resolved_at is null
             do update set
               forecast_amount = excluded.forecast_amount,
               actual_amount = excluded.actual_amount,
               delta = excluded.delta,
               age_days = excluded.age_days,
               severity = excluded.severity,
               detected_on = excluded.detected_on,
               last_raised_at = case when $12 then excluded.last_raised_at
                                     else reconciliation_discrepancies.last_raised_at end,
               raise_count = reconciliation_discrepancies.raise_count
                             + case when $12 then 1 else 0 end
             returning {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(discrepancy.kind.as_str())
        .bind(&discrepancy.opportunity_id)
        .bind(invoice_key(&discrepancy.invoice_id))
        .bind(discrepancy.forecast_amount)
        .bind(discrepancy.actual_amount)
        .bind(discrepancy.delta)
        .bind(discrepancy.age_days)
        .bind(discrepancy.severity.as_str())
        .bind(discrepancy.detected_on)
        .bind(now)
        .bind(raised)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn mark_resolved(&self, key: &DiscrepancyKey) -> SynclineResult<bool> {
        let result = sqlx::query(
            "update reconciliation_discrepancies
             set resolved_at = $1
             where kind = $2 and opportunity_id = $3 and invoice_key = $4
               and resolved_at is null",
        )
        .bind(Utc::now())
        .bind(key.kind.as_str())
        .bind(&key.opportunity_id)
        .bind(invoice_key(&key.invoice_id))
        .execute(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discrepancy::models::{DiscrepancyKind, Severity};
    use crate::{create_pool, ensure_schema};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    async fn test_repo() -> Option<PgDiscrepancyRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some(PgDiscrepancyRepository::new(pool))
    }

    fn overdue(opportunity_id: &str, age_days: i64, severity: Severity) -> ReconciliationDiscrepancy {
        ReconciliationDiscrepancy {
            kind: DiscrepancyKind::OverdueUnbilled,
            opportunity_id: opportunity_id.to_string(),
            invoice_id: None,
            forecast_amount: Some(Decimal::new(5000, 0)),
            actual_amount: None,
            delta: Decimal::new(5000, 0),
            age_days,
            severity,
            detected_on: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
        }
    }

    #[tokio::test]
    async fn record_keeps_one_open_row_per_key() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let opp = format!("OPP-{}", Uuid::new_v4());
        let first = repo
            .record(&overdue(&opp, 2, Severity::Low), true)
            .await
            .expect("first");
        let second = repo
            .record(&overdue(&opp, 3, Severity::Low), false)
            .await
            .expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(second.raise_count, 1);
        assert_eq!(second.discrepancy.age_days, 3);

        let escalated = repo
            .record(&overdue(&opp, 8, Severity::Medium), true)
            .await
            .expect("escalate");
        assert_eq!(escalated.raise_count, 2);
        assert_eq!(escalated.discrepancy.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn resolved_key_reopens_as_new_row() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let opp = format!("OPP-{}", Uuid::new_v4());
        let d = overdue(&opp, 1, Severity::Low);
        let first = repo.record(&d, true).await.expect("open");
        assert!(repo.mark_resolved(&d.key()).await.expect("resolve"));
        assert!(!repo.mark_resolved(&d.key()).await.expect("resolve again"));

        let reopened = repo.record(&d, true).await.expect("reopen");
        assert_ne!(first.id, reopened.id);
        let open = repo.list_open().await.expect("list");
        assert_eq!(
            open.iter()
                .filter(|o| o.discrepancy.opportunity_id == opp)
                .count(),
            1
        );
    }
}
