//! Deterministic in-process ERP used in mock mode and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use syncline_db::checkpoint::models::Cursor;
use syncline_db::edit::models::SalesDateEdit;
use syncline_db::invoice::models::{InvoiceRecord, InvoiceStatus};

use super::{ErpClient, ErpError, InvoicePage, MalformedRecord, PushAck};

struct Entry {
    sequence: i64,
    record: Result<InvoiceRecord, MalformedRecord>,
}

#[derive(Default)]
struct MockState {
    entries: Vec<Entry>,
    fetch_calls: usize,
    fetch_failures: HashMap<usize, ErpError>,
    push_failures: VecDeque<ErpError>,
    failing_pushes: Option<ErpError>,
    pushed: Vec<SalesDateEdit>,
}

pub struct InMemoryErp {
    page_size: usize,
    state: Mutex<MockState>,
}

impl Default for InMemoryErp {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryErp {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            state: Mutex::new(MockState::default()),
        }
    }

    /// A small fixed data set for running the service without an ERP.
    pub fn demo() -> Self {
        let erp = Self::new();
        let issued = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap_or_default();
        let now = Utc::now();
        for (seq, (number, opportunity, cents, status)) in [
            ("INV-DEMO-1", "SO-1001", 1_250_000, InvoiceStatus::Settled),
            ("INV-DEMO-2", "SO-1002", 480_000, InvoiceStatus::PartiallyPaid),
            ("INV-DEMO-3", "SO-1002", 120_000, InvoiceStatus::Open),
        ]
        .into_iter()
        .enumerate()
        {
            let sequence = seq as i64 + 1;
            erp.add_invoice(InvoiceRecord {
                external_id: number.to_owned(),
                opportunity_id: opportunity.to_owned(),
                customer_ref: "CUST-DEMO".to_owned(),
                amount: Decimal::new(cents, 2),
                currency: "USD".to_owned(),
                issue_date: issued,
                due_date: None,
                status,
                sequence,
                first_seen_at: now,
                last_synced_at: now,
            });
        }
        erp
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an invoice at its own `sequence`. Re-publishing the same
    /// invoice at a later sequence models an ERP status update.
    pub fn add_invoice(&self, invoice: InvoiceRecord) {
        let sequence = invoice.sequence;
        self.insert(Entry {
            sequence,
            record: Ok(invoice),
        });
    }

    pub fn add_malformed(&self, sequence: i64, reference: &str, reason: &str) {
        self.insert(Entry {
            sequence,
            record: Err(MalformedRecord {
                reference: Some(reference.to_owned()),
                reason: reason.to_owned(),
            }),
        });
    }

    fn insert(&self, entry: Entry) {
        let mut state = self.state();
        state.entries.push(entry);
        state.entries.sort_by_key(|e| e.sequence);
    }

    /// Fail the `call`-th fetch (0-based, counting every fetch).
    pub fn fail_fetch_on_call(&self, call: usize, error: ErpError) {
        self.state().fetch_failures.insert(call, error);
    }

    /// Fail the next push calls, in order.
    pub fn fail_next_push(&self, error: ErpError) {
        self.state().push_failures.push_back(error);
    }

    /// Fail every push with `error` until cleared with `None`.
    pub fn fail_all_pushes(&self, error: Option<ErpError>) {
        self.state().failing_pushes = error;
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    /// Edits the ERP acknowledged, in order.
    pub fn pushed(&self) -> Vec<SalesDateEdit> {
        self.state().pushed.clone()
    }
}

#[async_trait]
impl ErpClient for InMemoryErp {
    async fn fetch_invoices_since(&self, cursor: Cursor) -> Result<InvoicePage, ErpError> {
        let mut state = self.state();
        let call = state.fetch_calls;
        state.fetch_calls += 1;
        if let Some(error) = state.fetch_failures.remove(&call) {
            return Err(error);
        }

        let remaining: Vec<&Entry> = state
            .entries
            .iter()
            .filter(|e| e.sequence > cursor.value())
            .collect();
        let page: Vec<&Entry> = remaining.iter().take(self.page_size).copied().collect();
        let end_of_stream = remaining.len() <= self.page_size;
        let next_cursor = match page.last() {
            Some(last) => Cursor::new(last.sequence).map_err(|e| ErpError::Malformed(e.to_string()))?,
            None => cursor,
        };

        Ok(InvoicePage {
            records: page.iter().map(|e| e.record.clone()).collect(),
            next_cursor,
            end_of_stream,
        })
    }

    async fn push_sales_date_edit(&self, edit: &SalesDateEdit) -> Result<PushAck, ErpError> {
        let mut state = self.state();
        if let Some(error) = state.push_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.failing_pushes.clone() {
            return Err(error);
        }
        state.pushed.push(edit.clone());
        Ok(PushAck {
            reference: Some(format!("MOCK-{}-{}", edit.opportunity_id, edit.new_value)),
            message: Some(format!("{} updated", edit.field.as_str())),
        })
    }
}
