use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    UnexpectedRevenue,
    OverdueUnbilled,
    AmountMismatch,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnexpectedRevenue => "unexpected_revenue",
            Self::OverdueUnbilled => "overdue_unbilled",
            Self::AmountMismatch => "amount_mismatch",
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscrepancyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unexpected_revenue" => Ok(Self::UnexpectedRevenue),
            "overdue_unbilled" => Ok(Self::OverdueUnbilled),
            "amount_mismatch" => Ok(Self::AmountMismatch),
            _ => Err(format!("unknown discrepancy kind: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {value}")),
        }
    }
}

/// Identity of a discrepancy across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscrepancyKey {
    pub kind: DiscrepancyKind,
    pub opportunity_id: String,
    pub invoice_id: Option<String>,
}

impl fmt::Display for DiscrepancyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.invoice_id {
            Some(invoice) => write!(f, "{}:{}:{}", self.kind, self.opportunity_id, invoice),
            None => write!(f, "{}:{}", self.kind, self.opportunity_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationDiscrepancy {
    pub kind: DiscrepancyKind,
    pub opportunity_id: String,
    /// Set for per-invoice findings (unexpected revenue).
    pub invoice_id: Option<String>,
    pub forecast_amount: Option<Decimal>,
    pub actual_amount: Option<Decimal>,
    /// Actual minus forecast, a missing side counting as zero.
    pub delta: Decimal,
    pub age_days: i64,
    pub severity: Severity,
    pub detected_on: NaiveDate,
}

impl ReconciliationDiscrepancy {
    pub fn key(&self) -> DiscrepancyKey {
        DiscrepancyKey {
            kind: self.kind,
            opportunity_id: self.opportunity_id.clone(),
            invoice_id: self.invoice_id.clone(),
        }
    }
}

/// Ledger row: the latest raised state of a discrepancy still being tracked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenDiscrepancy {
    pub id: Uuid,
    pub discrepancy: ReconciliationDiscrepancy,
    pub first_raised_at: DateTime<Utc>,
    pub last_raised_at: DateTime<Utc>,
    pub raise_count: i32,
    pub resolved_at: Option<DateTime<Utc>>,
}
