use std::collections::{BTreeMap, BTreeSet};

use syncline_db::discrepancy::models::{DiscrepancyKey, OpenDiscrepancy, ReconciliationDiscrepancy};

/// How this run's findings relate to what is already open in the ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerDiff {
    /// Not open before: alert.
    pub raised: Vec<ReconciliationDiscrepancy>,
    /// Open, but worse or with a different delta: alert again.
    pub escalated: Vec<ReconciliationDiscrepancy>,
    /// Open and materially the same: refresh silently.
    pub unchanged: Vec<ReconciliationDiscrepancy>,
    /// Open but no longer detected.
    pub resolved: Vec<DiscrepancyKey>,
}

pub fn diff(open: &[OpenDiscrepancy], current: &[ReconciliationDiscrepancy]) -> LedgerDiff {
    let previous: BTreeMap<DiscrepancyKey, &ReconciliationDiscrepancy> = open
        .iter()
        .filter(|o| o.resolved_at.is_none())
        .map(|o| (o.discrepancy.key(), &o.discrepancy))
        .collect();

    let mut out = LedgerDiff::default();
    let mut seen = BTreeSet::new();

    for finding in current {
        let key = finding.key();
        match previous.get(&key) {
            None => out.raised.push(finding.clone()),
            Some(prev) if finding.severity > prev.severity || finding.delta != prev.delta => {
                out.escalated.push(finding.clone())
            }
            Some(_) => out.unchanged.push(finding.clone()),
        }
        seen.insert(key);
    }

    out.resolved = previous
        .into_keys()
        .filter(|key| !seen.contains(key))
        .collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use syncline_db::discrepancy::models::{DiscrepancyKind, Severity};
    use uuid::Uuid;

    fn overdue(opportunity_id: &str, age_days: i64, severity: Severity) -> ReconciliationDiscrepancy {
        ReconciliationDiscrepancy {
            kind: DiscrepancyKind::OverdueUnbilled,
            opportunity_id: opportunity_id.to_string(),
            invoice_id: None,
            forecast_amount: Some(Decimal::new(800, 0)),
            actual_amount: None,
            delta: Decimal::new(-800, 0),
            age_days,
            severity,
            detected_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        }
    }

    fn open_row(d: ReconciliationDiscrepancy) -> OpenDiscrepancy {
        OpenDiscrepancy {
            id: Uuid::new_v4(),
            discrepancy: d,
            first_raised_at: Utc::now(),
            last_raised_at: Utc::now(),
            raise_count: 1,
            resolved_at: None,
        }
    }

    #[test]
    fn first_detection_is_raised() {
        let d = diff(&[], &[overdue("7", 1, Severity::Low)]);
        assert_eq!(d.raised.len(), 1);
        assert!(d.escalated.is_empty());
    }

    #[test]
    fn same_finding_next_day_is_unchanged() {
        let open = [open_row(overdue("7", 1, Severity::Low))];
        let d = diff(&open, &[overdue("7", 2, Severity::Low)]);
        assert!(d.raised.is_empty() && d.escalated.is_empty());
        assert_eq!(d.unchanged.len(), 1);
        assert_eq!(d.unchanged[0].age_days, 2);
    }

    #[test]
    fn severity_increase_escalates() {
        let open = [open_row(overdue("7", 6, Severity::Low))];
        let d = diff(&open, &[overdue("7", 7, Severity::Medium)]);
        assert_eq!(d.escalated.len(), 1);
        assert!(d.raised.is_empty());
    }

    #[test]
    fn delta_change_escalates() {
        let open = [open_row(overdue("7", 3, Severity::Low))];
        let mut changed = overdue("7", 3, Severity::Low);
        changed.delta = Decimal::new(-900, 0);
        let d = diff(&open, &[changed]);
        assert_eq!(d.escalated.len(), 1);
    }

    #[test]
    fn severity_drop_is_not_an_alert() {
        let open = [open_row(overdue("7", 40, Severity::High))];
        let d = diff(&open, &[overdue("7", 40, Severity::Medium)]);
        assert!(d.raised.is_empty() && d.escalated.is_empty());
        assert_eq!(d.unchanged.len(), 1);
    }

    #[test]
    fn cleared_key_is_resolved() {
        let open = [open_row(overdue("7", 3, Severity::Low))];
        let d = diff(&open, &[]);
        assert_eq!(d.resolved.len(), 1);
        assert_eq!(d.resolved[0].opportunity_id, "7");
    }
}
