use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use syncline_db::invoice::models::{InvoiceRecord, InvoiceStatus};

use super::MalformedRecord;

/// Raw page body; records stay untyped so one bad record does not sink
/// the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePageBody {
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
    pub next_cursor: i64,
    pub end_of_stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpInvoice {
    pub invoice_number: String,
    pub opportunity_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub sequence: i64,
}

fn default_currency() -> String {
    "USD".to_owned()
}

impl ErpInvoice {
    pub fn into_record(self, now: DateTime<Utc>) -> Result<InvoiceRecord, MalformedRecord> {
        let malformed = |reason: String| MalformedRecord {
            reference: Some(self.invoice_number.clone()),
            reason,
        };

        if self.invoice_number.trim().is_empty() {
            return Err(MalformedRecord {
                reference: None,
                reason: "empty invoice number".to_owned(),
            });
        }
        if self.opportunity_id.trim().is_empty() {
            return Err(malformed("empty opportunity id".to_owned()));
        }
        if self.sequence < 0 {
            return Err(malformed(format!("negative sequence {}", self.sequence)));
        }
        let status = InvoiceStatus::from_erp(&self.status)
            .ok_or_else(|| malformed(format!("unknown status {:?}", self.status)))?;

        Ok(InvoiceRecord {
            external_id: self.invoice_number,
            opportunity_id: self.opportunity_id,
            customer_ref: self.customer_id,
            amount: self.amount,
            currency: self.currency.to_ascii_uppercase(),
            issue_date: self.issue_date,
            due_date: self.due_date,
            status,
            sequence: self.sequence,
            first_seen_at: now,
            last_synced_at: now,
        })
    }
}

/// Decode one untyped record, keeping whatever reference can be salvaged.
pub fn decode_record(
    value: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<InvoiceRecord, MalformedRecord> {
    let reference = value
        .get("invoiceNumber")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    match serde_json::from_value::<ErpInvoice>(value) {
        Ok(invoice) => invoice.into_record(now),
        Err(e) => Err(MalformedRecord {
            reference,
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBody<'a> {
    pub field: &'a str,
    pub value: NaiveDate,
    pub previous_value: Option<NaiveDate>,
    pub edit_id: String,
    pub tenant: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub update_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(status: &str) -> serde_json::Value {
        json!({
            "invoiceNumber": "INV-1001",
            "opportunityId": "42",
            "customerId": "CUST-9",
            "amount": "1000.00",
            "issueDate": "2026-03-01",
            "dueDate": "2026-03-31",
            "status": status,
            "sequence": 17
        })
    }

    #[test]
    fn decodes_valid_record_with_default_currency() {
        let inv = decode_record(record("issued"), Utc::now()).unwrap();
        assert_eq!(inv.external_id, "INV-1001");
        assert_eq!(inv.currency, "USD");
        assert_eq!(inv.status, InvoiceStatus::Open);
        assert_eq!(inv.amount, Decimal::new(100_000, 2));
        assert_eq!(inv.sequence, 17);
    }

    #[test]
    fn unknown_status_is_malformed_with_reference() {
        let err = decode_record(record("void"), Utc::now()).unwrap_err();
        assert_eq!(err.reference.as_deref(), Some("INV-1001"));
        assert!(err.reason.contains("void"));
    }

    #[test]
    fn missing_field_is_malformed() {
        let mut value = record("paid");
        value.as_object_mut().unwrap().remove("amount");
        let err = decode_record(value, Utc::now()).unwrap_err();
        assert_eq!(err.reference.as_deref(), Some("INV-1001"));
    }

    #[test]
    fn push_body_uses_camel_case() {
        let body = PushBody {
            field: "close_date",
            value: NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
            previous_value: None,
            edit_id: "e-1".to_string(),
            tenant: "acme",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["previousValue"], serde_json::Value::Null);
        assert_eq!(json["editId"], "e-1");
        assert_eq!(json["value"], "2026-04-30");
    }
}
