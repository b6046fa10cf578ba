use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use syncline_common::error::SynclineError;
use syncline_config::SyncSettings;
use syncline_db::checkpoint::models::{Cursor, SyncCheckpoint, INVOICES_STREAM, SALES_DATES_STREAM};
use syncline_db::checkpoint::pg_repository::PgCheckpointRepository;
use syncline_db::checkpoint::repositories::CheckpointRepository;
use syncline_db::discrepancy::models::ReconciliationDiscrepancy;
use syncline_db::discrepancy::pg_repository::PgDiscrepancyRepository;
use syncline_db::discrepancy::repositories::DiscrepancyRepository;
use syncline_db::edit::models::SalesDateEdit;
use syncline_db::edit::pg_repository::PgEditRepository;
use syncline_db::edit::repositories::EditRepository;
use syncline_db::forecast::pg_repository::PgForecastRepository;
use syncline_db::forecast::repositories::ForecastRepository;
use syncline_db::invoice::models::UpsertOutcome;
use syncline_db::invoice::pg_repository::PgInvoiceRepository;
use syncline_db::invoice::repositories::InvoiceRepository;
use syncline_db::run::models::{RunCounts, RunScope, RunStatus, RunTrigger, SyncRun};
use syncline_db::run::pg_repository::PgRunRepository;
use syncline_db::run::repositories::RunRepository;
use syncline_reconcile::{diff, reconcile, ReconcileConfig};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alerts::{Alert, AlertDispatcher};
use crate::erp::feed::InvoiceFeed;
use crate::erp::{ErpClient, ErpError, InvoicePage};
use crate::queue::RunExecutor;
use crate::retry::{with_timeout, BackoffPolicy};

/// Every store the orchestrator reads or writes.
#[derive(Clone)]
pub struct SyncStores {
    pub checkpoints: Arc<dyn CheckpointRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub forecasts: Arc<dyn ForecastRepository>,
    pub edits: Arc<dyn EditRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub discrepancies: Arc<dyn DiscrepancyRepository>,
}

impl SyncStores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            checkpoints: Arc::new(PgCheckpointRepository::new(pool.clone())),
            invoices: Arc::new(PgInvoiceRepository::new(pool.clone())),
            forecasts: Arc::new(PgForecastRepository::new(pool.clone())),
            edits: Arc::new(PgEditRepository::new(pool.clone())),
            runs: Arc::new(PgRunRepository::new(pool.clone())),
            discrepancies: Arc::new(PgDiscrepancyRepository::new(pool)),
        }
    }

    #[cfg(test)]
    pub fn memory(store: Arc<syncline_db::memory::MemoryStore>) -> Self {
        Self {
            checkpoints: store.clone(),
            invoices: store.clone(),
            forecasts: store.clone(),
            edits: store.clone(),
            runs: store.clone(),
            discrepancies: store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub fetch: BackoffPolicy,
    pub push: BackoffPolicy,
    pub call_timeout: Duration,
    pub lock_stale_after: chrono::Duration,
    pub reconcile: ReconcileConfig,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &SyncSettings, reconcile: ReconcileConfig) -> Self {
        Self {
            fetch: BackoffPolicy {
                base: settings.backoff_base,
                cap: settings.backoff_cap,
                max_attempts: settings.max_fetch_attempts,
            },
            push: BackoffPolicy {
                base: settings.backoff_base,
                cap: settings.backoff_cap,
                max_attempts: settings.max_push_attempts,
            },
            call_timeout: settings.call_timeout,
            lock_stale_after: chrono::Duration::from_std(settings.lock_stale_after)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            reconcile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Pulling,
    Reconciling,
    Pushing,
    Committing,
    Succeeded,
    PartialFailure,
    Failed,
    Cancelled,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Reconciling => "reconciling",
            Self::Pushing => "pushing",
            Self::Committing => "committing",
            Self::Succeeded => "succeeded",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub trigger: RunTrigger,
    pub scope: RunScope,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<SyncRun>),
    Skipped { reason: String },
}

#[derive(Debug, thiserror::Error)]
enum RunAbort {
    #[error(transparent)]
    Erp(#[from] ErpError),

    #[error(transparent)]
    Store(#[from] SynclineError),
}

/// Locks held for the duration of a run.
struct HeldLocks {
    /// Invoice checkpoint as it was when the lock was taken (full runs only).
    invoices: Option<SyncCheckpoint>,
}

#[derive(Default)]
struct RunReport {
    counts: RunCounts,
    start_cursor: Option<Cursor>,
    /// Last page boundary up to which every valid record was stored.
    commit_cursor: Option<Cursor>,
    end_cursor: Option<Cursor>,
    pull_complete: bool,
    pull_error: Option<String>,
    cancelled: bool,
    discrepancies: Vec<ReconciliationDiscrepancy>,
}

type Today = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct SyncOrchestrator {
    erp: Arc<dyn ErpClient>,
    stores: SyncStores,
    alerts: AlertDispatcher,
    config: OrchestratorConfig,
    today: Today,
}

impl SyncOrchestrator {
    pub fn new(
        erp: Arc<dyn ErpClient>,
        stores: SyncStores,
        alerts: AlertDispatcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            erp,
            stores,
            alerts,
            config,
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    /// For testing: pin the reconciliation date.
    #[cfg(test)]
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    fn enter(&self, run_id: Uuid, phase: RunPhase) {
        tracing::info!(%run_id, %phase, "sync run phase");
    }

    /// Drive one run to completion. Never returns an error: failures end up
    /// in the recorded `SyncRun`.
    pub async fn execute(&self, request: RunRequest, cancel: CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            %run_id,
            trigger = request.trigger.as_str(),
            scope = request.scope.as_str(),
            "sync run starting"
        );
        self.enter(run_id, RunPhase::Idle);

        let locks = match self.acquire_locks(request.scope).await {
            Ok(Some(locks)) => locks,
            Ok(None) => {
                let reason = "another sync run holds the checkpoint lock".to_owned();
                tracing::warn!(%run_id, %reason, "sync run skipped");
                return RunOutcome::Skipped { reason };
            }
            Err(e) => {
                let report = RunReport::default();
                return self
                    .finish(run_id, request, started_at, None, report, Err(e.into()))
                    .await;
            }
        };

        let mut report = RunReport::default();
        let result = self.drive(run_id, &locks, &mut report, &cancel).await;
        self.finish(run_id, request, started_at, Some(&locks), report, result)
            .await
    }

    async fn acquire_locks(&self, scope: RunScope) -> Result<Option<HeldLocks>, SynclineError> {
        let checkpoints = &self.stores.checkpoints;
        let stale = self.config.lock_stale_after;

        let invoices = if scope.includes_pull() {
            checkpoints.get_or_create(INVOICES_STREAM).await?;
            match checkpoints.acquire_lock(INVOICES_STREAM, stale).await? {
                Some(cp) => Some(cp),
                None => return Ok(None),
            }
        } else {
            None
        };

        checkpoints.get_or_create(SALES_DATES_STREAM).await?;
        if checkpoints
            .acquire_lock(SALES_DATES_STREAM, stale)
            .await?
            .is_none()
        {
            if invoices.is_some() {
                checkpoints.release(INVOICES_STREAM, None).await?;
            }
            return Ok(None);
        }

        Ok(Some(HeldLocks { invoices }))
    }

    async fn drive(
        &self,
        run_id: Uuid,
        locks: &HeldLocks,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<(), RunAbort> {
        if let Some(checkpoint) = &locks.invoices {
            self.enter(run_id, RunPhase::Pulling);
            report.start_cursor = Some(checkpoint.cursor);
            self.pull(checkpoint.cursor, report, cancel).await?;
            if report.cancelled {
                return Ok(());
            }

            self.enter(run_id, RunPhase::Reconciling);
            self.reconcile(report).await?;
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }
        self.enter(run_id, RunPhase::Pushing);
        self.push(report, cancel).await
    }

    async fn pull(
        &self,
        from: Cursor,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<(), RunAbort> {
        let mut feed = InvoiceFeed::new(self.erp.as_ref(), from);
        let mut clean = true;
        report.commit_cursor = Some(from);

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let page = match self.fetch_page(&mut feed, cancel).await {
                Ok(Some(page)) => page,
                Ok(None) => {
                    report.pull_complete = true;
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) if cancel.is_cancelled() => {
                    report.cancelled = true;
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(cursor = %feed.cursor(), error = %e, "invoice pull stopped");
                    report.pull_error = Some(e.to_string());
                    return Ok(());
                }
            };

            let page_cursor = page.next_cursor;
            for record in page.records {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                report.counts.pulled += 1;
                match record {
                    Ok(invoice) => match self.stores.invoices.upsert(&invoice).await {
                        Ok(UpsertOutcome::Unchanged) => report.counts.unchanged += 1,
                        Ok(_) => report.counts.applied += 1,
                        Err(e) => {
                            report.counts.record_errors += 1;
                            clean = false;
                            tracing::warn!(
                                invoice = %invoice.external_id,
                                error = %e,
                                "failed to store invoice"
                            );
                        }
                    },
                    Err(bad) => {
                        report.counts.skipped += 1;
                        tracing::warn!(
                            invoice = bad.reference.as_deref().unwrap_or("<unknown>"),
                            reason = %bad.reason,
                            "skipping malformed invoice record"
                        );
                    }
                }
            }

            if clean {
                report.commit_cursor = Some(page_cursor);
            }
            tracing::debug!(cursor = %page_cursor, "invoice page applied");
        }
    }

    async fn fetch_page(
        &self,
        feed: &mut InvoiceFeed<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoicePage>, ErpError> {
        let policy = self.config.fetch;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match with_timeout(self.config.call_timeout, feed.next_page()).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && policy.has_attempts_left(attempt) => {
                    let delay = policy.delay(attempt, e.retry_after());
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        cursor = %feed.cursor(),
                        error = %e,
                        "invoice fetch failed, retrying after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reconcile(&self, report: &mut RunReport) -> Result<(), RunAbort> {
        let invoices = self.stores.invoices.list_all().await?;
        let forecasts = self.stores.forecasts.list_active().await?;
        let as_of = (self.today)();
        let current = reconcile(&invoices, &forecasts, as_of, &self.config.reconcile);

        let open = self.stores.discrepancies.list_open().await?;
        let changes = diff(&open, &current);

        for finding in &changes.raised {
            self.stores.discrepancies.record(finding, true).await?;
            self.alerts
                .dispatch(Alert::Discrepancy {
                    discrepancy: finding.clone(),
                    escalated: false,
                })
                .await;
        }
        for finding in &changes.escalated {
            self.stores.discrepancies.record(finding, true).await?;
            self.alerts
                .dispatch(Alert::Discrepancy {
                    discrepancy: finding.clone(),
                    escalated: true,
                })
                .await;
        }
        for finding in &changes.unchanged {
            self.stores.discrepancies.record(finding, false).await?;
        }
        for key in &changes.resolved {
            self.stores.discrepancies.mark_resolved(key).await?;
            tracing::info!(%key, "discrepancy resolved");
        }

        tracing::info!(
            %as_of,
            detected = current.len(),
            raised = changes.raised.len(),
            escalated = changes.escalated.len(),
            resolved = changes.resolved.len(),
            "reconciliation finished"
        );
        report.discrepancies = current;
        Ok(())
    }

    async fn push(&self, report: &mut RunReport, cancel: &CancellationToken) -> Result<(), RunAbort> {
        loop {
            let due = self
                .stores
                .edits
                .list_due(Utc::now(), self.config.push.max_attempts)
                .await?;

            let mut next_retry: Option<DateTime<Utc>> = None;
            for edit in due {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                if let Some(at) = self.push_one(edit, report).await? {
                    next_retry = Some(next_retry.map_or(at, |current| current.min(at)));
                }
            }

            let Some(at) = next_retry else {
                return Ok(());
            };
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting to retry sales-date pushes");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    return Ok(());
                }
            }
        }
    }

    /// Push one edit. Returns when to retry it, if it failed transiently and
    /// has budget left.
    async fn push_one(
        &self,
        edit: SalesDateEdit,
        report: &mut RunReport,
    ) -> Result<Option<DateTime<Utc>>, RunAbort> {
        let edits = &self.stores.edits;
        let edit = match edits.mark_sent(edit.id).await {
            Ok(edit) => edit,
            // Superseded or otherwise settled since it was listed.
            Err(SynclineError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let result = with_timeout(self.config.call_timeout, self.erp.push_sales_date_edit(&edit)).await;
        match result {
            Ok(ack) => {
                let reference = ack.reference.as_deref();
                if edits.mark_acknowledged(edit.id, reference).await?.is_none() {
                    Self::log_settled_elsewhere(&edit);
                    return Ok(None);
                }
                report.counts.pushed += 1;
                tracing::info!(
                    edit_id = %edit.id,
                    opportunity = %edit.opportunity_id,
                    field = edit.field.as_str(),
                    reference = reference.unwrap_or("<none>"),
                    "sales-date edit acknowledged"
                );
                Ok(None)
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(ErpError::Conflict(detail)) => {
                tracing::warn!(edit_id = %edit.id, %detail, "sales-date edit conflicts with erp value");
                if edits.mark_conflict(edit.id, &detail).await? {
                    report.counts.push_failed += 1;
                    self.alerts
                        .dispatch(Alert::EditConflict {
                            edit_id: edit.id,
                            opportunity_id: edit.opportunity_id.clone(),
                            field: edit.field,
                            error: detail,
                        })
                        .await;
                }
                Ok(None)
            }
            Err(e) if e.is_retryable() => {
                let attempt = u32::try_from(edit.attempts).unwrap_or(0) + 1;
                let delay = self.config.push.delay(attempt, e.retry_after());
                let next_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                let Some(failed) = edits.record_failure(edit.id, &e.to_string(), next_at).await? else {
                    Self::log_settled_elsewhere(&edit);
                    return Ok(None);
                };
                let made = u32::try_from(failed.attempts).unwrap_or(u32::MAX);
                if self.config.push.has_attempts_left(made) {
                    tracing::warn!(
                        edit_id = %edit.id,
                        attempts = failed.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sales-date push failed, will retry"
                    );
                    return Ok(Some(next_at));
                }
                self.exhaust(&failed, &e.to_string(), report).await?;
                Ok(None)
            }
            Err(e) => {
                let Some(failed) = edits.record_failure(edit.id, &e.to_string(), Utc::now()).await? else {
                    Self::log_settled_elsewhere(&edit);
                    return Ok(None);
                };
                self.exhaust(&failed, &e.to_string(), report).await?;
                Ok(None)
            }
        }
    }

    /// The edit left `sent` while its push was in flight, normally because a
    /// newer edit superseded it. Its outcome is dropped.
    fn log_settled_elsewhere(edit: &SalesDateEdit) {
        tracing::info!(
            edit_id = %edit.id,
            opportunity = %edit.opportunity_id,
            field = edit.field.as_str(),
            "sales-date edit settled while its push was in flight, dropping result"
        );
    }

    async fn exhaust(
        &self,
        edit: &SalesDateEdit,
        error: &str,
        report: &mut RunReport,
    ) -> Result<(), RunAbort> {
        report.counts.push_failed += 1;
        tracing::error!(
            edit_id = %edit.id,
            attempts = edit.attempts,
            %error,
            "sales-date edit failed permanently"
        );
        if self.stores.edits.mark_exhausted(edit.id, error).await? {
            self.alerts
                .dispatch(Alert::EditFailed {
                    edit_id: edit.id,
                    opportunity_id: edit.opportunity_id.clone(),
                    field: edit.field,
                    attempts: edit.attempts,
                    error: error.to_owned(),
                })
                .await;
        }
        Ok(())
    }

    /// Commit or release locks, classify the run, alert on failure and
    /// append the audit record.
    async fn finish(
        &self,
        run_id: Uuid,
        request: RunRequest,
        started_at: DateTime<Utc>,
        locks: Option<&HeldLocks>,
        mut report: RunReport,
        result: Result<(), RunAbort>,
    ) -> RunOutcome {
        let mut error = result.err().map(|e| e.to_string());
        let checkpoints = &self.stores.checkpoints;

        if let Some(locks) = locks {
            if error.is_none() && !report.cancelled {
                self.enter(run_id, RunPhase::Committing);
            }

            if locks.invoices.is_some() {
                let settled = match (&error, report.commit_cursor) {
                    (None, Some(cursor)) if report.pull_complete && !report.cancelled => checkpoints
                        .commit(INVOICES_STREAM, cursor)
                        .await
                        .map(|cp| report.end_cursor = Some(cp.cursor)),
                    (None, _) => checkpoints
                        .release(INVOICES_STREAM, report.pull_error.as_deref())
                        .await
                        .map(|_| ()),
                    (Some(message), _) => checkpoints
                        .release(INVOICES_STREAM, Some(message))
                        .await
                        .map(|_| ()),
                };
                if let Err(e) = settled {
                    tracing::error!(%run_id, error = %e, "failed to settle invoice checkpoint");
                    error.get_or_insert(e.to_string());
                }
            }

            if let Err(e) = checkpoints
                .release(SALES_DATES_STREAM, error.as_deref())
                .await
            {
                tracing::error!(%run_id, error = %e, "failed to release sales-date lock");
                error.get_or_insert(e.to_string());
            }
        }

        let counts = report.counts;
        let status = if error.is_some() {
            RunStatus::Failed
        } else if report.cancelled {
            RunStatus::Cancelled
        } else if report.pull_error.is_some()
            || counts.skipped > 0
            || counts.record_errors > 0
            || counts.push_failed > 0
        {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        let phase = match status {
            RunStatus::Success => RunPhase::Succeeded,
            RunStatus::Partial => RunPhase::PartialFailure,
            RunStatus::Failed => RunPhase::Failed,
            RunStatus::Cancelled => RunPhase::Cancelled,
        };
        self.enter(run_id, phase);

        if let Some(message) = &error {
            self.alerts
                .dispatch(Alert::RunFailed {
                    run_id,
                    trigger: request.trigger,
                    error: message.clone(),
                })
                .await;
        }

        let run = SyncRun {
            id: run_id,
            trigger: request.trigger,
            scope: request.scope,
            started_at,
            finished_at: Utc::now(),
            start_cursor: report.start_cursor,
            end_cursor: report.end_cursor,
            counts,
            discrepancies: report.discrepancies,
            status,
            error_message: error.or(report.pull_error),
        };

        if let Err(e) = self.stores.runs.insert(&run).await {
            tracing::error!(%run_id, error = %e, "failed to record sync run");
        }
        tracing::info!(
            %run_id,
            status = status.as_str(),
            pulled = counts.pulled,
            applied = counts.applied,
            skipped = counts.skipped,
            pushed = counts.pushed,
            push_failed = counts.push_failed,
            "sync run finished"
        );
        RunOutcome::Completed(Box::new(run))
    }
}

#[async_trait]
impl RunExecutor for SyncOrchestrator {
    async fn execute(&self, request: RunRequest, cancel: CancellationToken) -> RunOutcome {
        SyncOrchestrator::execute(self, request, cancel).await
    }
}
