use rust_decimal::Decimal;
use syncline_db::discrepancy::models::Severity;

use crate::config::SeverityBands;

pub fn ratio_band(ratio: Decimal, bands: &SeverityBands) -> Severity {
    if ratio >= fraction(bands.ratio_critical) {
        Severity::Critical
    } else if ratio >= fraction(bands.ratio_high) {
        Severity::High
    } else if ratio >= fraction(bands.ratio_medium) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

pub fn age_band(age_days: i64, bands: &SeverityBands) -> Severity {
    if age_days >= bands.age_critical_days {
        Severity::Critical
    } else if age_days >= bands.age_high_days {
        Severity::High
    } else if age_days >= bands.age_medium_days {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Worst of the ratio and age bands. `ratio` is `None` for findings that
/// have no amount comparison.
pub fn classify(ratio: Option<Decimal>, age_days: i64, bands: &SeverityBands) -> Severity {
    let by_age = age_band(age_days, bands);
    match ratio {
        Some(r) => by_age.max(ratio_band(r, bands)),
        None => by_age,
    }
}

/// Decimal form of a configured fraction, via its shortest decimal text so
/// that `0.05` compares as exactly five hundredths.
pub(crate) fn fraction(value: f64) -> Decimal {
    value.to_string().parse().unwrap_or(Decimal::ZERO)
}
