pub mod client;
pub mod feed;
pub mod mock;
pub mod models;

use std::time::Duration;

use async_trait::async_trait;
use syncline_db::checkpoint::models::Cursor;
use syncline_db::edit::models::SalesDateEdit;
use syncline_db::invoice::models::InvoiceRecord;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErpError {
    #[error("erp rejected credentials: {0}")]
    Auth(String),

    #[error("erp rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient erp failure: {0}")]
    Transient(String),

    #[error("erp value changed concurrently: {0}")]
    Conflict(String),

    #[error("erp rejected the request: {0}")]
    Rejected(String),

    #[error("malformed erp response: {0}")]
    Malformed(String),
}

impl ErpError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A record inside an otherwise valid page that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    /// Invoice number, when it could be read.
    pub reference: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct InvoicePage {
    pub records: Vec<Result<InvoiceRecord, MalformedRecord>>,
    /// Cursor to resume from after this page.
    pub next_cursor: Cursor,
    pub end_of_stream: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushAck {
    /// ERP-side update id. `None` when the ERP accepted the update but its
    /// acknowledgement could not be decoded.
    pub reference: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait ErpClient: Send + Sync {
    /// One page of invoices with sequence after `cursor`.
    async fn fetch_invoices_since(&self, cursor: Cursor) -> Result<InvoicePage, ErpError>;

    async fn push_sales_date_edit(&self, edit: &SalesDateEdit) -> Result<PushAck, ErpError>;
}
