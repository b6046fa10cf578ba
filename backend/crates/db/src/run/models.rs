use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::models::Cursor;
use crate::discrepancy::models::ReconciliationDiscrepancy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    CatchUp,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::CatchUp => "catch_up",
        }
    }
}

impl FromStr for RunTrigger {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            "catch_up" => Ok(Self::CatchUp),
            _ => Err(format!("unknown run trigger: {value}")),
        }
    }
}

/// What a run does. `Full` pulls, reconciles and pushes; `PushOnly` pushes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RunScope {
    PushOnly,
    Full,
}

impl RunScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PushOnly => "push_only",
            Self::Full => "full",
        }
    }

    pub fn includes_pull(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// The scope that covers both `self` and `other`.
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

impl FromStr for RunScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full" => Ok(Self::Full),
            "push_only" => Ok(Self::PushOnly),
            _ => Err(format!("unknown run scope: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown run status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounts {
    pub pulled: i64,
    pub applied: i64,
    pub unchanged: i64,
    pub skipped: i64,
    pub record_errors: i64,
    pub pushed: i64,
    pub push_failed: i64,
}

/// Audit entry for one executed run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub scope: RunScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub start_cursor: Option<Cursor>,
    pub end_cursor: Option<Cursor>,
    pub counts: RunCounts,
    pub discrepancies: Vec<ReconciliationDiscrepancy>,
    pub status: RunStatus,
    pub error_message: Option<String>,
}
