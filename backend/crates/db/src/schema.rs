use sqlx::PgPool;

use syncline_common::error::{SynclineError, SynclineResult};

const STATEMENTS: &[&str] = &[
    "create table if not exists sync_checkpoints (
        id uuid primary key,
        stream text not null unique,
        cursor_value bigint not null default 0 check (cursor_value >= 0),
        last_committed_at timestamptz,
        status text not null default 'idle',
        error_message text,
        locked_at timestamptz,
        created_at timestamptz not null default now(),
        updated_at timestamptz not null default now()
    )",
    "create table if not exists invoice_records (
        external_id text primary key,
        opportunity_id text not null,
        customer_ref text not null,
        amount numeric(18, 2) not null,
        currency text not null default 'USD',
        issue_date date not null,
        due_date date,
        status text not null,
        status_rank smallint not null,
        sequence bigint not null,
        first_seen_at timestamptz not null,
        last_synced_at timestamptz not null
    )",
    "create index if not exists idx_invoice_records_opportunity
        on invoice_records (opportunity_id)",
    "create table if not exists opportunity_forecasts (
        opportunity_id text primary key,
        name text not null,
        forecast_amount numeric(18, 2) not null,
        expected_date date not null,
        tolerance_pct double precision,
        stage text not null default 'open',
        updated_at timestamptz not null default now()
    )",
    "create table if not exists sales_date_edits (
        id uuid primary key,
        opportunity_id text not null,
        field text not null,
        previous_value date,
        new_value date not null,
        origin_user text not null,
        submitted_at timestamptz not null,
        state text not null default 'pending',
        attempts integer not null default 0,
        next_attempt_at timestamptz,
        last_error text,
        erp_reference text,
        acknowledged_at timestamptz,
        alerted_at timestamptz
    )",
    "create index if not exists idx_sales_date_edits_state
        on sales_date_edits (state, next_attempt_at)",
    "create table if not exists sync_runs (
        id uuid primary key,
        trigger text not null,
        scope text not null,
        started_at timestamptz not null,
        finished_at timestamptz not null,
        start_cursor bigint,
        end_cursor bigint,
        pulled bigint not null default 0,
        applied bigint not null default 0,
        unchanged bigint not null default 0,
        skipped bigint not null default 0,
        record_errors bigint not null default 0,
        pushed bigint not null default 0,
        push_failed bigint not null default 0,
        discrepancies jsonb not null default '[]'::jsonb,
        status text not null,
        error_message text
    )",
    "create index if not exists idx_sync_runs_started on sync_runs (started_at desc)",
    "create table if not exists reconciliation_discrepancies (
        id uuid primary key,
        kind text not null,
        opportunity_id text not null,
        invoice_key text not null default '',
        forecast_amount numeric(18, 2),
        actual_amount numeric(18, 2),
        delta numeric(18, 2) not null,
        age_days bigint not null,
        severity text not null,
        detected_on date not null,
        first_raised_at timestamptz not null,
        last_raised_at timestamptz not null,
        raise_count integer not null default 1,
        resolved_at timestamptz
    )",
    "create unique index if not exists uq_open_discrepancy
        on reconciliation_discrepancies (kind, opportunity_id, invoice_key)
        where resolved_at is null",
];

/// Create the tables this service owns if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> SynclineResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| SynclineError::Database(e.to_string()))?;
    }
    tracing::debug!(statements = STATEMENTS.len(), "schema ensured");
    Ok(())
}
