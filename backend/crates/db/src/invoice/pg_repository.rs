use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::invoice::models::{InvoiceRecord, UpsertOutcome};
use crate::invoice::repositories::InvoiceRepository;
use syncline_common::error::{SynclineError, SynclineResult};

const COLUMNS: &str = "external_id, opportunity_id, customer_ref, amount, currency, issue_date,
     due_date, status, sequence, first_seen_at, last_synced_at";

#[derive(Clone)]
pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SynclineResult<InvoiceRecord> {
        let status: String = row.get("status");
        Ok(InvoiceRecord {
            external_id: row.get("external_id"),
            opportunity_id: row.get("opportunity_id"),
            customer_ref: row.get("customer_ref"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            issue_date: row.get("issue_date"),
            due_date: row.get("due_date"),
            status: status.parse().map_err(SynclineError::Database)?,
            sequence: row.get("sequence"),
            first_seen_at: row.get("first_seen_at"),
            last_synced_at: row.get("last_synced_at"),
        })
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    async fn upsert(&self, invoice: &InvoiceRecord) -> SynclineResult<UpsertOutcome> {
        // `prev` reads the pre-statement snapshot, so it reports the rank the
        // row had before this upsert touched it.
        let row = sqlx::query(
            "with prev as (
               select status_rank from invoice_records where external_id = $1
             )
             insert into invoice_records
             (external_id, opportunity_id, customer_ref, amount, currency, issue_date,
              due_date, status, status_rank, sequence, first_seen_at, last_synced_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             on conflict (external_id) do update set
               status = case when excluded.status_rank > invoice_records.status_rank
                             then excluded.status else invoice_records.status end,
               status_rank = greatest(invoice_records.status_rank, excluded.status_rank),
               sequence = greatest(invoice_records.sequence, excluded.sequence),
               last_synced_at = excluded.last_synced_at
             returning (xmax = 0) as inserted,
                       status_rank,
                       (select status_rank from prev) as prev_rank",
        )
        .bind(&invoice.external_id)
        .bind(&invoice.opportunity_id)
        .bind(&invoice.customer_ref)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.status.as_str())
        .bind(invoice.status.rank())
        .bind(invoice.sequence)
        .bind(invoice.first_seen_at)
        .bind(invoice.last_synced_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        let inserted: bool = row.get("inserted");
        if inserted {
            return Ok(UpsertOutcome::Inserted);
        }

        let rank: i16 = row.get("status_rank");
        let prev_rank: Option<i16> = row.get("prev_rank");
        if prev_rank.is_some_and(|prev| rank > prev) {
            Ok(UpsertOutcome::StatusAdvanced)
        } else {
            Ok(UpsertOutcome::Unchanged)
        }
    }

    async fn get(&self, external_id: &str) -> SynclineResult<Option<InvoiceRecord>> {
        let row = sqlx::query(&format!(
            "select {COLUMNS} from invoice_records where external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn list_all(&self) -> SynclineResult<Vec<InvoiceRecord>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from invoice_records order by sequence, external_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SynclineError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::models::InvoiceStatus;
    use crate::{create_pool, ensure_schema};
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    async fn test_repo() -> Option<PgInvoiceRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some(PgInvoiceRepository::new(pool))
    }

    fn make_invoice(status: InvoiceStatus, amount: i64) -> InvoiceRecord {
        InvoiceRecord {
            external_id: format!("INV-{}", Uuid::new_v4()),
            opportunity_id: "OPP-100".to_string(),
            customer_ref: "CUST-1".to_string(),
            amount: Decimal::new(amount, 0),
            currency: "USD".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            due_date: None,
            status,
            sequence: 1,
            first_seen_at: Utc::now(),
            last_synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_is_unchanged() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let invoice = make_invoice(InvoiceStatus::Open, 1000);
        assert_eq!(
            repo.upsert(&invoice).await.expect("insert"),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            repo.upsert(&invoice).await.expect("re-apply"),
            UpsertOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn upsert_advances_status_but_keeps_amount() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let mut invoice = make_invoice(InvoiceStatus::Open, 1000);
        repo.upsert(&invoice).await.expect("insert");

        invoice.status = InvoiceStatus::Settled;
        invoice.amount = Decimal::new(5, 0);
        assert_eq!(
            repo.upsert(&invoice).await.expect("advance"),
            UpsertOutcome::StatusAdvanced
        );

        let stored = repo
            .get(&invoice.external_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, InvoiceStatus::Settled);
        assert_eq!(stored.amount, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn upsert_ignores_status_regression() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let mut invoice = make_invoice(InvoiceStatus::Settled, 700);
        repo.upsert(&invoice).await.expect("insert");

        invoice.status = InvoiceStatus::Open;
        assert_eq!(
            repo.upsert(&invoice).await.expect("stale"),
            UpsertOutcome::Unchanged
        );
        let stored = repo
            .get(&invoice.external_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, InvoiceStatus::Settled);
    }
}
