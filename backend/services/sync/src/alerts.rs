use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use syncline_db::discrepancy::models::ReconciliationDiscrepancy;
use syncline_db::edit::models::DateField;
use syncline_db::run::models::RunTrigger;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    Discrepancy {
        discrepancy: ReconciliationDiscrepancy,
        escalated: bool,
    },
    EditFailed {
        edit_id: Uuid,
        opportunity_id: String,
        field: DateField,
        attempts: i32,
        error: String,
    },
    EditConflict {
        edit_id: Uuid,
        opportunity_id: String,
        field: DateField,
        error: String,
    },
    RunFailed {
        run_id: Uuid,
        trigger: RunTrigger,
        error: String,
    },
}

impl Alert {
    pub fn summary(&self) -> String {
        match self {
            Self::Discrepancy {
                discrepancy,
                escalated,
            } => format!(
                "{}{} on opportunity {} (delta {}, {} days, {})",
                if *escalated { "escalated " } else { "" },
                discrepancy.kind,
                discrepancy.opportunity_id,
                discrepancy.delta,
                discrepancy.age_days,
                discrepancy.severity
            ),
            Self::EditFailed {
                opportunity_id,
                field,
                attempts,
                error,
                ..
            } => format!(
                "{} edit for opportunity {opportunity_id} failed after {attempts} attempts: {error}",
                field.as_str()
            ),
            Self::EditConflict {
                opportunity_id,
                field,
                error,
                ..
            } => format!(
                "{} edit for opportunity {opportunity_id} needs manual reconciliation: {error}",
                field.as_str()
            ),
            Self::RunFailed {
                run_id,
                trigger,
                error,
            } => format!("{} sync run {run_id} failed: {error}", trigger.as_str()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("alert delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log as structured warnings.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let payload = serde_json::to_string(alert).unwrap_or_default();
        tracing::warn!(alert = %payload, "{}", alert.summary());
        Ok(())
    }
}

/// POSTs each alert as JSON to a webhook.
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    summary: String,
    alert: &'a Alert,
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                summary: alert.summary(),
                alert,
            })
            .send()
            .await
            .map_err(|e| AlertError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Delivery(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Hands alerts to a sink. Delivery is bounded by `timeout` and failures
/// are only logged; alerting never fails a sync.
#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Returns whether the sink accepted the alert.
    pub async fn dispatch(&self, alert: Alert) -> bool {
        let result = match tokio::time::timeout(self.timeout, self.sink.deliver(&alert)).await {
            Ok(result) => result,
            Err(_) => Err(AlertError::Timeout(self.timeout)),
        };
        match result {
            Ok(()) => {
                tracing::debug!(sink = self.sink.name(), "alert delivered");
                true
            }
            Err(e) => {
                tracing::error!(
                    sink = self.sink.name(),
                    error = %e,
                    alert = %alert.summary(),
                    "alert delivery failed"
                );
                false
            }
        }
    }
}
