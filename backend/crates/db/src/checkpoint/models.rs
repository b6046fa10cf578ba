use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use syncline_common::error::{SynclineError, SynclineResult};

/// Stream carrying ERP invoices into the CRM.
pub const INVOICES_STREAM: &str = "invoices";

/// Stream carrying CRM sales-date edits out to the ERP.
pub const SALES_DATES_STREAM: &str = "sales_dates";

/// Resumable position in the ERP's ordered invoice feed.
///
/// The ERP issues a monotonic sequence; `EPOCH` means "from the beginning".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    pub const EPOCH: Cursor = Cursor(0);

    /// Rejects values the ERP can never have issued.
    pub fn new(value: i64) -> SynclineResult<Self> {
        if value < 0 {
            return Err(SynclineError::Validation(format!(
                "cursor must not be negative, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Idle,
    Running,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown checkpoint status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub id: Uuid,
    pub stream: String,
    pub cursor: Cursor,
    pub last_committed_at: Option<DateTime<Utc>>,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(stream: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            stream: stream.to_owned(),
            cursor: Cursor::EPOCH,
            last_committed_at: None,
            status: CheckpointStatus::Idle,
            error_message: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A running lock whose holder has not finished within `stale_after`.
    pub fn is_lock_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        match (self.status, self.locked_at) {
            (CheckpointStatus::Running, Some(locked_at)) => now - locked_at >= stale_after,
            (CheckpointStatus::Running, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn negative_cursor_is_rejected() {
        assert!(Cursor::new(-1).is_err());
        assert_eq!(Cursor::new(0).unwrap(), Cursor::EPOCH);
        assert_eq!(Cursor::new(42).unwrap().value(), 42);
    }

    #[test]
    fn cursors_order_by_sequence() {
        assert!(Cursor::new(7).unwrap() > Cursor::new(3).unwrap());
    }

    #[test]
    fn cursor_serializes_as_plain_number() {
        let json = serde_json::to_string(&Cursor::new(15).unwrap()).unwrap();
        assert_eq!(json, "15");
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            CheckpointStatus::Idle,
            CheckpointStatus::Running,
            CheckpointStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<CheckpointStatus>().unwrap(), s);
        }
        assert!("paused".parse::<CheckpointStatus>().is_err());
    }

    #[test]
    fn lock_goes_stale_after_threshold() {
        let now = Utc::now();
        let mut cp = SyncCheckpoint::new(INVOICES_STREAM);
        assert!(!cp.is_lock_stale(now, Duration::minutes(10)));

        cp.status = CheckpointStatus::Running;
        cp.locked_at = Some(now - Duration::minutes(5));
        assert!(!cp.is_lock_stale(now, Duration::minutes(10)));

        cp.locked_at = Some(now - Duration::minutes(11));
        assert!(cp.is_lock_stale(now, Duration::minutes(10)));
    }
}
