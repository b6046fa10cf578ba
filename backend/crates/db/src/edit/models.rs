use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sales-date fields the CRM is allowed to push to the ERP.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    CloseDate,
    DeliveryDate,
    InvoiceDate,
}

impl DateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloseDate => "close_date",
            Self::DeliveryDate => "delivery_date",
            Self::InvoiceDate => "invoice_date",
        }
    }
}

impl FromStr for DateField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "close_date" => Ok(Self::CloseDate),
            "delivery_date" => Ok(Self::DeliveryDate),
            "invoice_date" => Ok(Self::InvoiceDate),
            _ => Err(format!("unknown date field: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EditState {
    Pending,
    Sent,
    Acknowledged,
    Failed,
    Conflict,
    Superseded,
}

impl EditState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
            Self::Superseded => "superseded",
        }
    }
}

impl FromStr for EditState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "acknowledged" => Ok(Self::Acknowledged),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("unknown edit state: {value}")),
        }
    }
}

/// A CRM-side sales-date change awaiting (or done with) delivery to the ERP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesDateEdit {
    pub id: Uuid,
    pub opportunity_id: String,
    pub field: DateField,
    /// What the CRM believed the ERP held when the edit was made.
    pub previous_value: Option<NaiveDate>,
    pub new_value: NaiveDate,
    pub origin_user: String,
    pub submitted_at: DateTime<Utc>,
    pub state: EditState,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub erp_reference: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Set once, when the operator was told this edit will not go through.
    pub alerted_at: Option<DateTime<Utc>>,
}

impl SalesDateEdit {
    pub fn new(
        opportunity_id: &str,
        field: DateField,
        previous_value: Option<NaiveDate>,
        new_value: NaiveDate,
        origin_user: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id: opportunity_id.to_owned(),
            field,
            previous_value,
            new_value,
            origin_user: origin_user.to_owned(),
            submitted_at: Utc::now(),
            state: EditState::Pending,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            erp_reference: None,
            acknowledged_at: None,
            alerted_at: None,
        }
    }

    /// No further delivery attempts will be made.
    pub fn is_terminal(&self, max_attempts: u32) -> bool {
        match self.state {
            EditState::Acknowledged | EditState::Conflict | EditState::Superseded => true,
            EditState::Failed => {
                self.alerted_at.is_some() || self.attempts >= attempts_limit(max_attempts)
            }
            EditState::Pending | EditState::Sent => false,
        }
    }

    /// Eligible for a push attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        !self.is_terminal(max_attempts) && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

pub(crate) fn attempts_limit(max_attempts: u32) -> i32 {
    i32::try_from(max_attempts).unwrap_or(i32::MAX)
}
