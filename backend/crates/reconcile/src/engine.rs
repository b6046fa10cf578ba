use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use syncline_db::discrepancy::models::{DiscrepancyKind, ReconciliationDiscrepancy, Severity};
use syncline_db::forecast::models::OpportunityForecast;
use syncline_db::invoice::models::InvoiceRecord;

use crate::config::ReconcileConfig;
use crate::severity::{classify, fraction};

/// Compare CRM forecasts with ERP invoices as of `as_of`.
///
/// Invoices are matched to forecasts by `opportunity_id` and summed per
/// opportunity. Lost forecasts do not take part. Output is sorted by
/// discrepancy key.
pub fn reconcile(
    invoices: &[InvoiceRecord],
    forecasts: &[OpportunityForecast],
    as_of: NaiveDate,
    config: &ReconcileConfig,
) -> Vec<ReconciliationDiscrepancy> {
    let active: BTreeMap<&str, &OpportunityForecast> = forecasts
        .iter()
        .filter(|f| f.is_active())
        .map(|f| (f.opportunity_id.as_str(), f))
        .collect();

    let mut billed: BTreeMap<&str, Vec<&InvoiceRecord>> = BTreeMap::new();
    for invoice in invoices {
        billed
            .entry(invoice.opportunity_id.as_str())
            .or_default()
            .push(invoice);
    }

    let mut found = Vec::new();

    for (opportunity_id, group) in &billed {
        match active.get(opportunity_id) {
            Some(forecast) => {
                if let Some(d) = amount_mismatch(forecast, group, as_of, config) {
                    found.push(d);
                }
            }
            None => found.extend(group.iter().map(|inv| unexpected_revenue(inv, as_of, config))),
        }
    }

    for (opportunity_id, forecast) in &active {
        if !billed.contains_key(opportunity_id) && forecast.expected_date < as_of {
            found.push(overdue_unbilled(forecast, as_of, config));
        }
    }

    found.sort_by_key(|d| d.key());
    found
}

fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days().max(0)
}

fn unexpected_revenue(
    invoice: &InvoiceRecord,
    as_of: NaiveDate,
    config: &ReconcileConfig,
) -> ReconciliationDiscrepancy {
    let age_days = days_between(invoice.issue_date, as_of);
    ReconciliationDiscrepancy {
        kind: DiscrepancyKind::UnexpectedRevenue,
        opportunity_id: invoice.opportunity_id.clone(),
        invoice_id: Some(invoice.external_id.clone()),
        forecast_amount: None,
        actual_amount: Some(invoice.amount),
        delta: invoice.amount,
        age_days,
        severity: classify(None, age_days, &config.bands),
        detected_on: as_of,
    }
}

fn overdue_unbilled(
    forecast: &OpportunityForecast,
    as_of: NaiveDate,
    config: &ReconcileConfig,
) -> ReconciliationDiscrepancy {
    let age_days = days_between(forecast.expected_date, as_of);
    ReconciliationDiscrepancy {
        kind: DiscrepancyKind::OverdueUnbilled,
        opportunity_id: forecast.opportunity_id.clone(),
        invoice_id: None,
        forecast_amount: Some(forecast.forecast_amount),
        actual_amount: None,
        delta: -forecast.forecast_amount,
        age_days,
        severity: classify(None, age_days, &config.bands),
        detected_on: as_of,
    }
}

fn amount_mismatch(
    forecast: &OpportunityForecast,
    invoices: &[&InvoiceRecord],
    as_of: NaiveDate,
    config: &ReconcileConfig,
) -> Option<ReconciliationDiscrepancy> {
    let actual = invoices
        .iter()
        .try_fold(Decimal::ZERO, |sum, inv| sum.checked_add(inv.amount));
    let delta = actual.and_then(|a| a.checked_sub(forecast.forecast_amount));
    let (Some(actual), Some(delta)) = (actual, delta) else {
        return Some(unmeasurable(forecast, invoices, actual, as_of));
    };
    if delta.abs() <= config.min_delta {
        return None;
    }

    let tolerance = fraction(forecast.tolerance_pct.unwrap_or(config.tolerance));
    // Nothing billed against a non-zero forecast is off by the full amount.
    let ratio = if actual.is_zero() {
        Some(Decimal::ONE)
    } else {
        delta.checked_div(actual).map(|r| r.abs())
    };
    if ratio.is_some_and(|r| r <= tolerance) {
        return None;
    }

    let latest_issue = invoices.iter().map(|inv| inv.issue_date).max()?;
    let age_days = days_between(latest_issue, as_of);
    Some(ReconciliationDiscrepancy {
        kind: DiscrepancyKind::AmountMismatch,
        opportunity_id: forecast.opportunity_id.clone(),
        invoice_id: None,
        forecast_amount: Some(forecast.forecast_amount),
        actual_amount: Some(actual),
        delta,
        age_days,
        // A ratio too large to represent is past every band.
        severity: match ratio {
            Some(r) => classify(Some(r), age_days, &config.bands),
            None => Severity::Critical,
        },
        detected_on: as_of,
    })
}

/// Amounts too large to sum or compare exactly. Reported as critical so an
/// operator looks at the source data.
fn unmeasurable(
    forecast: &OpportunityForecast,
    invoices: &[&InvoiceRecord],
    actual: Option<Decimal>,
    as_of: NaiveDate,
) -> ReconciliationDiscrepancy {
    let latest_issue = invoices.iter().map(|inv| inv.issue_date).max().unwrap_or(as_of);
    ReconciliationDiscrepancy {
        kind: DiscrepancyKind::AmountMismatch,
        opportunity_id: forecast.opportunity_id.clone(),
        invoice_id: None,
        forecast_amount: Some(forecast.forecast_amount),
        actual_amount: actual,
        delta: Decimal::MAX,
        age_days: days_between(latest_issue, as_of),
        severity: Severity::Critical,
        detected_on: as_of,
    }
}
