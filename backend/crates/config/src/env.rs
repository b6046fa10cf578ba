use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;
use syncline_common::error::{SynclineError, SynclineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> SynclineResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            host: get_var_or("HOST", "0.0.0.0"),
            port: parse_var_or("PORT", 8080)?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Knobs for the sync orchestrator, run queue and scheduler.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Local wall-clock time of the daily run.
    pub daily_at: NaiveTime,
    pub catch_up_on_startup: bool,
    pub max_fetch_attempts: u32,
    pub max_push_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Per ERP call, not per run.
    pub call_timeout: Duration,
    /// A checkpoint lock older than this is considered abandoned.
    pub lock_stale_after: Duration,
    pub alert_timeout: Duration,
    pub alert_webhook_url: Option<String>,
    pub erp_mock_mode: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            catch_up_on_startup: false,
            max_fetch_attempts: 3,
            max_push_attempts: 5,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_secs(300),
            call_timeout: Duration::from_secs(30),
            lock_stale_after: Duration::from_secs(3600),
            alert_timeout: Duration::from_millis(2000),
            alert_webhook_url: None,
            erp_mock_mode: false,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> SynclineResult<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let daily_at = match env::var("SYNC_DAILY_AT") {
            Ok(raw) => parse_daily_at(&raw)?,
            Err(_) => defaults.daily_at,
        };

        let settings = Self {
            daily_at,
            catch_up_on_startup: parse_bool_or("SYNC_CATCH_UP_ON_STARTUP", false)?,
            max_fetch_attempts: parse_var_or("SYNC_MAX_FETCH_ATTEMPTS", defaults.max_fetch_attempts)?,
            max_push_attempts: parse_var_or("SYNC_MAX_PUSH_ATTEMPTS", defaults.max_push_attempts)?,
            backoff_base: Duration::from_millis(parse_var_or("SYNC_BACKOFF_BASE_MS", 1000)?),
            backoff_cap: Duration::from_secs(parse_var_or("SYNC_BACKOFF_CAP_SECS", 300)?),
            call_timeout: Duration::from_secs(parse_var_or("SYNC_CALL_TIMEOUT_SECS", 30)?),
            lock_stale_after: Duration::from_secs(parse_var_or("SYNC_LOCK_STALE_SECS", 3600)?),
            alert_timeout: Duration::from_millis(parse_var_or("ALERT_TIMEOUT_MS", 2000)?),
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL")
                .ok()
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty()),
            erp_mock_mode: parse_bool_or("ERP_MOCK_MODE", false)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> SynclineResult<()> {
        if self.max_fetch_attempts == 0 {
            return Err(SynclineError::Config(
                "SYNC_MAX_FETCH_ATTEMPTS must be at least 1".to_owned(),
            ));
        }
        if self.max_push_attempts == 0 {
            return Err(SynclineError::Config(
                "SYNC_MAX_PUSH_ATTEMPTS must be at least 1".to_owned(),
            ));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(SynclineError::Config(format!(
                "backoff base ({:?}) exceeds backoff cap ({:?})",
                self.backoff_base, self.backoff_cap
            )));
        }
        if self.call_timeout.is_zero() {
            return Err(SynclineError::Config(
                "SYNC_CALL_TIMEOUT_SECS must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_daily_at(raw: &str) -> SynclineResult<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|e| SynclineError::Config(format!("invalid SYNC_DAILY_AT {trimmed:?}: {e}")))
}

fn get_var(key: &str) -> SynclineResult<String> {
    env::var(key).map_err(|_| SynclineError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(key: &str, default: T) -> SynclineResult<T>
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

fn parse_bool_or(key: &str, default: bool) -> SynclineResult<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(SynclineError::Config(format!(
                "invalid {key}: expected a boolean, got {other:?}"
            ))),
        },
        Err(_) => Ok(default),
    }
}
