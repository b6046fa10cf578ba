use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use syncline_db::checkpoint::models::Cursor;
use syncline_db::edit::models::SalesDateEdit;

use super::models::{decode_record, InvoicePageBody, PushBody, PushResponse};
use super::{ErpClient, ErpError, InvoicePage, PushAck};

#[derive(Debug, Clone)]
pub struct ErpClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub tenant: String,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl ErpClientConfig {
    /// Load ERP config from environment.
    ///
    /// Returns `Ok(None)` if `ERP_BASE_URL` is not set.
    /// Returns `Err` if the base URL is set but credentials or tenant are
    /// missing, or a numeric setting does not parse.
    pub fn from_env() -> Result<Option<Self>, String> {
        let base_url = match std::env::var("ERP_BASE_URL").ok() {
            Some(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_owned(),
            _ => return Ok(None),
        };

        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format!("{key} is required when ERP_BASE_URL is set"))
        };
        let client_id = required("ERP_CLIENT_ID")?;
        let client_secret = required("ERP_CLIENT_SECRET")?;
        let tenant = required("ERP_TENANT")?;

        let page_size = parse_or("ERP_PAGE_SIZE", 100)?;
        if page_size == 0 {
            return Err("ERP_PAGE_SIZE must be at least 1".to_owned());
        }
        let timeout_secs = parse_or("ERP_TIMEOUT_SECS", 30)?;

        Ok(Some(Self {
            base_url,
            client_id,
            client_secret,
            tenant,
            page_size,
            timeout_secs,
        }))
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} is not a valid number: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[derive(Clone)]
pub struct HttpErpClient {
    client: Client,
    config: ErpClientConfig,
}

impl HttpErpClient {
    pub fn new(config: ErpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    fn send_error(e: reqwest::Error) -> ErpError {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ErpError::Transient(e.to_string())
        } else {
            ErpError::Malformed(e.to_string())
        }
    }

    /// Map a non-success response onto the error taxonomy.
    async fn status_error(response: Response) -> ErpError {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return ErpError::RateLimited { retry_after };
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!("{status}: {body}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErpError::Auth(detail),
            StatusCode::CONFLICT => ErpError::Conflict(detail),
            StatusCode::REQUEST_TIMEOUT => ErpError::Transient(detail),
            s if s.is_server_error() => ErpError::Transient(detail),
            _ => ErpError::Rejected(detail),
        }
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
    async fn fetch_invoices_since(&self, cursor: Cursor) -> Result<InvoicePage, ErpError> {
        let url = format!("{}/invoices", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("since", cursor.value().to_string()),
                ("limit", self.config.page_size.to_string()),
                ("tenant", self.config.tenant.clone()),
            ])
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .send()
            .await
            .map_err(Self::send_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: InvoicePageBody = response
            .json()
            .await
            .map_err(|e| ErpError::Malformed(e.to_string()))?;
        let next_cursor =
            Cursor::new(body.next_cursor).map_err(|e| ErpError::Malformed(e.to_string()))?;

        let now = Utc::now();
        let records = body
            .records
            .into_iter()
            .map(|value| decode_record(value, now))
            .collect();

        Ok(InvoicePage {
            records,
            next_cursor,
            end_of_stream: body.end_of_stream,
        })
    }

    async fn push_sales_date_edit(&self, edit: &SalesDateEdit) -> Result<PushAck, ErpError> {
        let url = format!(
            "{}/opportunities/{}",
            self.config.base_url, edit.opportunity_id
        );
        let body = PushBody {
            field: edit.field.as_str(),
            value: edit.new_value,
            previous_value: edit.previous_value,
            edit_id: edit.id.to_string(),
            tenant: &self.config.tenant,
        };

        let response = self
            .client
            .patch(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("Idempotency-Key", edit.id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(Self::send_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        // The update is applied once the ERP answers 2xx. A body we cannot
        // read does not undo that; the edit is settled without a reference.
        let text = response
            .text()
            .await
            .map_err(|e| ErpError::Transient(e.to_string()))?;
        match serde_json::from_str::<PushResponse>(&text) {
            Ok(ack) => Ok(PushAck {
                reference: Some(ack.update_id),
                message: ack.message,
            }),
            Err(e) => {
                tracing::warn!(
                    edit_id = %edit.id,
                    error = %e,
                    body = %text,
                    "erp accepted sales-date edit with an unreadable acknowledgement"
                );
                Ok(PushAck {
                    reference: None,
                    message: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Mutex;
    use syncline_db::edit::models::DateField;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ERP_KEYS: &[&str] = &[
        "ERP_BASE_URL",
        "ERP_CLIENT_ID",
        "ERP_CLIENT_SECRET",
        "ERP_TENANT",
        "ERP_PAGE_SIZE",
        "ERP_TIMEOUT_SECS",
    ];

    fn clear_erp_vars() {
        for key in ERP_KEYS {
            std::env::remove_var(key);
        }
    }

    fn test_config() -> ErpClientConfig {
        ErpClientConfig {
            base_url: "http://localhost".to_string(),
            client_id: "syncline".to_string(),
            client_secret: "secret".to_string(),
            tenant: "acme".to_string(),
            page_size: 2,
            timeout_secs: 5,
        }
    }

    fn client_for(server: &MockServer) -> HttpErpClient {
        HttpErpClient::new(test_config())
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn record(number: &str, sequence: i64) -> serde_json::Value {
        json!({
            "invoiceNumber": number,
            "opportunityId": "42",
            "customerId": "CUST-1",
            "amount": 250.5,
            "currency": "eur",
            "issueDate": "2026-03-01",
            "status": "paid",
            "sequence": sequence
        })
    }

    fn edit() -> SalesDateEdit {
        SalesDateEdit::new(
            "42",
            DateField::CloseDate,
            NaiveDate::from_ymd_opt(2026, 4, 1),
            NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
            "maria",
        )
    }

    #[test]
    fn from_env_returns_none_without_base_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_erp_vars();
        assert!(ErpClientConfig::from_env().unwrap().is_none());
    }

    #[test]
    fn from_env_fails_fast_on_partial_config() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_erp_vars();
        std::env::set_var("ERP_BASE_URL", "https://erp.example.com/api/");
        std::env::set_var("ERP_CLIENT_ID", "syncline");

        let err = ErpClientConfig::from_env().unwrap_err();
        assert!(err.contains("ERP_CLIENT_SECRET"), "got: {err}");
        clear_erp_vars();
    }

    #[test]
    fn from_env_reads_full_config() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_erp_vars();
        std::env::set_var("ERP_BASE_URL", "https://erp.example.com/api/");
        std::env::set_var("ERP_CLIENT_ID", "syncline");
        std::env::set_var("ERP_CLIENT_SECRET", "s3cret");
        std::env::set_var("ERP_TENANT", "acme");
        std::env::set_var("ERP_PAGE_SIZE", "250");

        let cfg = ErpClientConfig::from_env().unwrap().unwrap();
        assert_eq!(cfg.base_url, "https://erp.example.com/api");
        assert_eq!(cfg.page_size, 250);
        assert_eq!(cfg.timeout_secs, 30);
        clear_erp_vars();
    }

    #[tokio::test]
    async fn fetch_decodes_page_and_keeps_bad_records_separate() {
        let server = MockServer::start().await;
        let mut bad = record("INV-2", 11);
        bad["status"] = json!("cancelled");

        Mock::given(method("GET"))
            .and(path("/invoices"))
            .and(query_param("since", "10"))
            .and(query_param("limit", "2"))
            .and(query_param("tenant", "acme"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [record("INV-1", 10), bad],
                "nextCursor": 11,
                "endOfStream": false
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .fetch_invoices_since(Cursor::new(10).unwrap())
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        let good = page.records[0].as_ref().unwrap();
        assert_eq!(good.currency, "EUR");
        assert_eq!(good.amount.to_string(), "250.5");
        let malformed = page.records[1].as_ref().unwrap_err();
        assert_eq!(malformed.reference.as_deref(), Some("INV-2"));
        assert_eq!(page.next_cursor.value(), 11);
        assert!(!page.end_of_stream);
    }

    #[tokio::test]
    async fn fetch_maps_401_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_invoices_since(Cursor::EPOCH)
            .await
            .unwrap_err();
        assert!(err.is_fatal(), "got {err:?}");
    }

    #[tokio::test]
    async fn fetch_maps_503_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_invoices_since(Cursor::EPOCH)
            .await
            .unwrap_err();
        assert!(matches!(err, ErpError::Transient(_)));
    }

    #[tokio::test]
    async fn fetch_honours_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_invoices_since(Cursor::EPOCH)
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[tokio::test]
    async fn fetch_rejects_negative_next_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [],
                "nextCursor": -4,
                "endOfStream": true
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_invoices_since(Cursor::EPOCH)
            .await
            .unwrap_err();
        assert!(matches!(err, ErpError::Malformed(_)));
    }

    #[tokio::test]
    async fn push_sends_idempotency_key_and_previous_value() {
        let server = MockServer::start().await;
        let edit = edit();

        Mock::given(method("PATCH"))
            .and(path("/opportunities/42"))
            .and(header("Idempotency-Key", edit.id.to_string().as_str()))
            .and(body_partial_json(json!({
                "field": "close_date",
                "value": "2026-04-30",
                "previousValue": "2026-04-01",
                "tenant": "acme"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "updateId": "UPD-991",
                "message": "close date updated"
            })))
            .mount(&server)
            .await;

        let ack = client_for(&server).push_sales_date_edit(&edit).await.unwrap();
        assert_eq!(ack.reference.as_deref(), Some("UPD-991"));
        assert_eq!(ack.message.as_deref(), Some("close date updated"));
    }

    #[tokio::test]
    async fn push_maps_409_to_conflict_and_422_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/opportunities/42"))
            .respond_with(ResponseTemplate::new(409).set_body_string("value changed"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/opportunities/42"))
            .respond_with(ResponseTemplate::new(422).set_body_string("date in the past"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first = client.push_sales_date_edit(&edit()).await.unwrap_err();
        assert!(matches!(first, ErpError::Conflict(_)));
        let second = client.push_sales_date_edit(&edit()).await.unwrap_err();
        assert!(matches!(second, ErpError::Rejected(_)));
    }

    #[tokio::test]
    async fn accepted_push_with_unreadable_body_has_no_reference() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/opportunities/42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let ack = client_for(&server).push_sales_date_edit(&edit()).await.unwrap();
        assert_eq!(ack.reference, None);
        assert_eq!(ack.message, None);
    }
}
