use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment status of an ERP invoice. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    PartiallyPaid,
    Settled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::PartiallyPaid => "partially_paid",
            Self::Settled => "settled",
        }
    }

    /// Position in the open → partially-paid → settled progression.
    pub fn rank(&self) -> i16 {
        match self {
            Self::Open => 0,
            Self::PartiallyPaid => 1,
            Self::Settled => 2,
        }
    }

    /// Map the ERP's status vocabulary onto ours. `None` for unknown values.
    pub fn from_erp(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" | "issued" | "open" | "overdue" => Some(Self::Open),
            "partial" | "partially_paid" | "partially-paid" => Some(Self::PartiallyPaid),
            "paid" | "settled" | "closed" => Some(Self::Settled),
            _ => None,
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "settled" => Ok(Self::Settled),
            _ => Err(format!("unknown invoice status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceRecord {
    pub external_id: String,
    /// ERP sales-order / opportunity id; the reconciliation key.
    pub opportunity_id: String,
    pub customer_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: InvoiceStatus,
    /// ERP sequence value this record was delivered at.
    pub sequence: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    StatusAdvanced,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erp_vocabulary_maps_onto_three_states() {
        assert_eq!(InvoiceStatus::from_erp("issued"), Some(InvoiceStatus::Open));
        assert_eq!(InvoiceStatus::from_erp("Overdue"), Some(InvoiceStatus::Open));
        assert_eq!(
            InvoiceStatus::from_erp("partially-paid"),
            Some(InvoiceStatus::PartiallyPaid)
        );
        assert_eq!(InvoiceStatus::from_erp(" PAID "), Some(InvoiceStatus::Settled));
        assert_eq!(InvoiceStatus::from_erp("void"), None);
    }

    #[test]
    fn rank_follows_ordering() {
        assert!(InvoiceStatus::Open.rank() < InvoiceStatus::PartiallyPaid.rank());
        assert!(InvoiceStatus::PartiallyPaid.rank() < InvoiceStatus::Settled.rank());
    }
}
