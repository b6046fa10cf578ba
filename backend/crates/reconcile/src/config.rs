use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use syncline_common::error::{SynclineError, SynclineResult};

/// Lower bounds of each severity band. A value at a bound is in that band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityBands {
    pub ratio_medium: f64,
    pub ratio_high: f64,
    pub ratio_critical: f64,
    pub age_medium_days: i64,
    pub age_high_days: i64,
    pub age_critical_days: i64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            ratio_medium: 0.10,
            ratio_high: 0.25,
            ratio_critical: 0.50,
            age_medium_days: 7,
            age_high_days: 30,
            age_critical_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Allowed `|actual - forecast| / actual` as a fraction. Forecasts may
    /// override it.
    pub tolerance: f64,
    /// Mismatches at or below this absolute amount are ignored.
    pub min_delta: Decimal,
    pub bands: SeverityBands,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            min_delta: Decimal::ONE,
            bands: SeverityBands::default(),
        }
    }
}

impl ReconcileConfig {
    /// Reads `RECONCILE_TOLERANCE_PCT` (fraction, e.g. `0.05`) and
    /// `RECONCILE_MIN_DELTA`.
    pub fn from_env() -> SynclineResult<Self> {
        let defaults = Self::default();
        let config = Self {
            tolerance: parse_or("RECONCILE_TOLERANCE_PCT", defaults.tolerance)?,
            min_delta: parse_or("RECONCILE_MIN_DELTA", defaults.min_delta)?,
            bands: defaults.bands,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SynclineResult<()> {
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(SynclineError::Config(format!(
                "RECONCILE_TOLERANCE_PCT must be between 0 and 1, got {}",
                self.tolerance
            )));
        }
        if self.min_delta.is_sign_negative() {
            return Err(SynclineError::Config(format!(
                "RECONCILE_MIN_DELTA must not be negative, got {}",
                self.min_delta
            )));
        }
        Ok(())
    }
}

fn parse_or<T>(key: &str, default: T) -> SynclineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SynclineError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_one_percent_and_one_unit() {
        let cfg = ReconcileConfig::default();
        assert_eq!(cfg.tolerance, 0.01);
        assert_eq!(cfg.min_delta, Decimal::ONE);
        assert_eq!(cfg.bands.age_high_days, 30);
    }

    #[test]
    fn from_env_reads_overrides() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        env::set_var("RECONCILE_TOLERANCE_PCT", "0.05");
        env::set_var("RECONCILE_MIN_DELTA", "25.50");

        let cfg = ReconcileConfig::from_env().expect("valid overrides");
        assert_eq!(cfg.tolerance, 0.05);
        assert_eq!(cfg.min_delta, Decimal::new(2550, 2));

        env::remove_var("RECONCILE_TOLERANCE_PCT");
        env::remove_var("RECONCILE_MIN_DELTA");
    }

    #[test]
    fn from_env_rejects_tolerance_above_one() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        env::set_var("RECONCILE_TOLERANCE_PCT", "5");
        let err = ReconcileConfig::from_env().unwrap_err();
        assert!(matches!(err, SynclineError::Config(_)));
        env::remove_var("RECONCILE_TOLERANCE_PCT");
    }
}
