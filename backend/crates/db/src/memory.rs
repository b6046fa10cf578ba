//! In-process implementations of every repository trait, for tests and
//! local development without Postgres.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::checkpoint::models::{CheckpointStatus, Cursor, SyncCheckpoint};
use crate::checkpoint::repositories::CheckpointRepository;
use crate::discrepancy::models::{DiscrepancyKey, OpenDiscrepancy, ReconciliationDiscrepancy};
use crate::discrepancy::repositories::DiscrepancyRepository;
use crate::edit::models::{EditState, SalesDateEdit};
use crate::edit::repositories::EditRepository;
use crate::forecast::models::OpportunityForecast;
use crate::forecast::repositories::ForecastRepository;
use crate::invoice::models::{InvoiceRecord, UpsertOutcome};
use crate::invoice::repositories::InvoiceRepository;
use crate::run::models::{RunTrigger, SyncRun};
use crate::run::repositories::RunRepository;
use syncline_common::error::{SynclineError, SynclineResult};

#[derive(Default)]
struct MemoryState {
    checkpoints: HashMap<String, SyncCheckpoint>,
    invoices: BTreeMap<String, InvoiceRecord>,
    forecasts: BTreeMap<String, OpportunityForecast>,
    edits: Vec<SalesDateEdit>,
    runs: Vec<SyncRun>,
    discrepancies: Vec<OpenDiscrepancy>,
    poisoned_invoices: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> SynclineResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| SynclineError::Internal("memory store lock poisoned".to_owned()))
    }

    /// Replace a checkpoint wholesale, e.g. to leave a lock behind as a
    /// crashed process would.
    pub fn put_checkpoint(&self, checkpoint: SyncCheckpoint) -> SynclineResult<()> {
        self.state()?
            .checkpoints
            .insert(checkpoint.stream.clone(), checkpoint);
        Ok(())
    }

    /// Make every upsert of `external_id` fail with a database error.
    pub fn poison_invoice(&self, external_id: &str) -> SynclineResult<()> {
        self.state()?
            .poisoned_invoices
            .insert(external_id.to_owned());
        Ok(())
    }

    fn edit_mut<'a>(state: &'a mut MemoryState, id: Uuid) -> SynclineResult<&'a mut SalesDateEdit> {
        state
            .edits
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SynclineError::NotFound(format!("sales-date edit {id}")))
    }
}

#[async_trait]
impl CheckpointRepository for MemoryStore {
    async fn get(&self, stream: &str) -> SynclineResult<Option<SyncCheckpoint>> {
        Ok(self.state()?.checkpoints.get(stream).cloned())
    }

    async fn get_or_create(&self, stream: &str) -> SynclineResult<SyncCheckpoint> {
        let mut state = self.state()?;
        let cp = state
            .checkpoints
            .entry(stream.to_owned())
            .or_insert_with(|| SyncCheckpoint::new(stream));
        Ok(cp.clone())
    }

    async fn acquire_lock(
        &self,
        stream: &str,
        stale_after: chrono::Duration,
    ) -> SynclineResult<Option<SyncCheckpoint>> {
        let now = Utc::now();
        let mut state = self.state()?;
        let Some(cp) = state.checkpoints.get_mut(stream) else {
            return Ok(None);
        };
        if cp.status == CheckpointStatus::Running && !cp.is_lock_stale(now, stale_after) {
            return Ok(None);
        }
        cp.status = CheckpointStatus::Running;
        cp.error_message = None;
        cp.locked_at = Some(now);
        cp.updated_at = now;
        Ok(Some(cp.clone()))
    }

    async fn commit(&self, stream: &str, cursor: Cursor) -> SynclineResult<SyncCheckpoint> {
        let now = Utc::now();
        let mut state = self.state()?;
        let cp = state
            .checkpoints
            .get_mut(stream)
            .ok_or_else(|| SynclineError::NotFound(format!("checkpoint {stream}")))?;
        if cursor < cp.cursor {
            return Err(SynclineError::Validation(format!(
                "refusing to move {stream} checkpoint back from {} to {cursor}",
                cp.cursor
            )));
        }
        cp.cursor = cursor;
        cp.last_committed_at = Some(now);
        cp.status = CheckpointStatus::Idle;
        cp.error_message = None;
        cp.locked_at = None;
        cp.updated_at = now;
        Ok(cp.clone())
    }

    async fn release(
        &self,
        stream: &str,
        error_message: Option<&str>,
    ) -> SynclineResult<SyncCheckpoint> {
        let mut state = self.state()?;
        let cp = state
            .checkpoints
            .get_mut(stream)
            .ok_or_else(|| SynclineError::NotFound(format!("checkpoint {stream}")))?;
        cp.status = match error_message {
            Some(_) => CheckpointStatus::Failed,
            None => CheckpointStatus::Idle,
        };
        cp.error_message = error_message.map(str::to_owned);
        cp.locked_at = None;
        cp.updated_at = Utc::now();
        Ok(cp.clone())
    }
}

#[async_trait]
impl InvoiceRepository for MemoryStore {
    async fn upsert(&self, invoice: &InvoiceRecord) -> SynclineResult<UpsertOutcome> {
        let mut state = self.state()?;
        if state.poisoned_invoices.contains(&invoice.external_id) {
            return Err(SynclineError::Database(format!(
                "write rejected for invoice {}",
                invoice.external_id
            )));
        }
        match state.invoices.get_mut(&invoice.external_id) {
            None => {
                state
                    .invoices
                    .insert(invoice.external_id.clone(), invoice.clone());
                Ok(UpsertOutcome::Inserted)
            }
            Some(stored) => {
                // Same rule as the `status_rank` column: never regress.
                let advanced = if invoice.status.rank() > stored.status.rank() {
                    invoice.status
                } else {
                    stored.status
                };
                let outcome = if advanced != stored.status {
                    UpsertOutcome::StatusAdvanced
                } else {
                    UpsertOutcome::Unchanged
                };
                stored.status = advanced;
                stored.sequence = stored.sequence.max(invoice.sequence);
                stored.last_synced_at = invoice.last_synced_at;
                Ok(outcome)
            }
        }
    }

    async fn get(&self, external_id: &str) -> SynclineResult<Option<InvoiceRecord>> {
        Ok(self.state()?.invoices.get(external_id).cloned())
    }

    async fn list_all(&self) -> SynclineResult<Vec<InvoiceRecord>> {
        let mut invoices: Vec<_> = self.state()?.invoices.values().cloned().collect();
        invoices.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(invoices)
    }
}

#[async_trait]
impl ForecastRepository for MemoryStore {
    async fn get(&self, opportunity_id: &str) -> SynclineResult<Option<OpportunityForecast>> {
        Ok(self.state()?.forecasts.get(opportunity_id).cloned())
    }

    async fn upsert(&self, forecast: &OpportunityForecast) -> SynclineResult<OpportunityForecast> {
        self.state()?
            .forecasts
            .insert(forecast.opportunity_id.clone(), forecast.clone());
        Ok(forecast.clone())
    }

    async fn list_active(&self) -> SynclineResult<Vec<OpportunityForecast>> {
        Ok(self
            .state()?
            .forecasts
            .values()
            .filter(|f| f.is_active())
            .cloned()
            .collect())
    }

    async fn set_expected_date(
        &self,
        opportunity_id: &str,
        expected_date: NaiveDate,
    ) -> SynclineResult<OpportunityForecast> {
        let mut state = self.state()?;
        let forecast = state
            .forecasts
            .get_mut(opportunity_id)
            .ok_or_else(|| SynclineError::NotFound(format!("opportunity {opportunity_id}")))?;
        forecast.expected_date = expected_date;
        forecast.updated_at = Utc::now();
        Ok(forecast.clone())
    }
}

#[async_trait]
impl EditRepository for MemoryStore {
    async fn submit(&self, edit: &SalesDateEdit) -> SynclineResult<SalesDateEdit> {
        let mut state = self.state()?;
        let mut stored = edit.clone();
        let mut oldest: Option<DateTime<Utc>> = None;
        for older in state.edits.iter_mut().filter(|e| {
            e.id != edit.id
                && e.opportunity_id == edit.opportunity_id
                && e.field == edit.field
                && matches!(
                    e.state,
                    EditState::Pending | EditState::Sent | EditState::Failed
                )
                && e.alerted_at.is_none()
        }) {
            older.state = EditState::Superseded;
            older.next_attempt_at = None;
            if oldest.map_or(true, |at| older.submitted_at < at) {
                oldest = Some(older.submitted_at);
                stored.previous_value = older.previous_value;
            }
        }
        state.edits.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> SynclineResult<Option<SalesDateEdit>> {
        Ok(self.state()?.edits.iter().find(|e| e.id == id).cloned())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> SynclineResult<Vec<SalesDateEdit>> {
        let mut due: Vec<_> = self
            .state()?
            .edits
            .iter()
            .filter(|e| e.is_due(now, max_attempts))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn mark_sent(&self, id: Uuid) -> SynclineResult<SalesDateEdit> {
        let mut state = self.state()?;
        let edit = Self::edit_mut(&mut state, id)?;
        if matches!(
            edit.state,
            EditState::Pending | EditState::Sent | EditState::Failed
        ) {
            edit.state = EditState::Sent;
            Ok(edit.clone())
        } else {
            Err(SynclineError::NotFound(format!("sales-date edit {id}")))
        }
    }

    async fn mark_acknowledged(
        &self,
        id: Uuid,
        erp_reference: Option<&str>,
    ) -> SynclineResult<Option<SalesDateEdit>> {
        let mut state = self.state()?;
        let edit = Self::edit_mut(&mut state, id)?;
        if edit.state != EditState::Sent {
            return Ok(None);
        }
        edit.state = EditState::Acknowledged;
        edit.erp_reference = erp_reference.map(str::to_owned);
        edit.acknowledged_at = Some(Utc::now());
        edit.next_attempt_at = None;
        edit.last_error = None;
        Ok(Some(edit.clone()))
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> SynclineResult<Option<SalesDateEdit>> {
        let mut state = self.state()?;
        let edit = Self::edit_mut(&mut state, id)?;
        if edit.state != EditState::Sent {
            return Ok(None);
        }
        edit.state = EditState::Failed;
        edit.attempts += 1;
        edit.last_error = Some(error.to_owned());
        edit.next_attempt_at = Some(next_attempt_at);
        Ok(Some(edit.clone()))
    }

    async fn mark_exhausted(&self, id: Uuid, error: &str) -> SynclineResult<bool> {
        let mut state = self.state()?;
        let edit = Self::edit_mut(&mut state, id)?;
        if edit.alerted_at.is_some() || !matches!(edit.state, EditState::Sent | EditState::Failed) {
            return Ok(false);
        }
        edit.state = EditState::Failed;
        edit.last_error = Some(error.to_owned());
        edit.next_attempt_at = None;
        edit.alerted_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_conflict(&self, id: Uuid, error: &str) -> SynclineResult<bool> {
        let mut state = self.state()?;
        let edit = Self::edit_mut(&mut state, id)?;
        if edit.alerted_at.is_some() || edit.state != EditState::Sent {
            return Ok(false);
        }
        edit.state = EditState::Conflict;
        edit.last_error = Some(error.to_owned());
        edit.next_attempt_at = None;
        edit.alerted_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn insert(&self, run: &SyncRun) -> SynclineResult<SyncRun> {
        self.state()?.runs.push(run.clone());
        Ok(run.clone())
    }

    async fn list_recent(&self, limit: i64) -> SynclineResult<Vec<SyncRun>> {
        let mut runs = self.state()?.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(runs)
    }

    async fn latest_of(&self, triggers: &[RunTrigger]) -> SynclineResult<Option<SyncRun>> {
        Ok(self
            .state()?
            .runs
            .iter()
            .filter(|r| triggers.contains(&r.trigger))
            .max_by_key(|r| r.started_at)
            .cloned())
    }
}

#[async_trait]
impl DiscrepancyRepository for MemoryStore {
    async fn list_open(&self) -> SynclineResult<Vec<OpenDiscrepancy>> {
        let mut open: Vec<_> = self
            .state()?
            .discrepancies
            .iter()
            .filter(|d| d.resolved_at.is_none())
            .cloned()
            .collect();
        open.sort_by_key(|d| d.discrepancy.key());
        Ok(open)
    }

    async fn record(
        &self,
        discrepancy: &ReconciliationDiscrepancy,
        raised: bool,
    ) -> SynclineResult<OpenDiscrepancy> {
        let now = Utc::now();
        let key = discrepancy.key();
        let mut state = self.state()?;
        if let Some(row) = state
            .discrepancies
            .iter_mut()
            .find(|d| d.resolved_at.is_none() && d.discrepancy.key() == key)
        {
            row.discrepancy = discrepancy.clone();
            if raised {
                row.last_raised_at = now;
                row.raise_count += 1;
            }
            return Ok(row.clone());
        }
        let row = OpenDiscrepancy {
            id: Uuid::new_v4(),
            discrepancy: discrepancy.clone(),
            first_raised_at: now,
            last_raised_at: now,
            raise_count: 1,
            resolved_at: None,
        };
        state.discrepancies.push(row.clone());
        Ok(row)
    }

    async fn mark_resolved(&self, key: &DiscrepancyKey) -> SynclineResult<bool> {
        let mut state = self.state()?;
        match state
            .discrepancies
            .iter_mut()
            .find(|d| d.resolved_at.is_none() && &d.discrepancy.key() == key)
        {
            Some(row) => {
                row.resolved_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
