use chrono::NaiveDate;
use serde::Deserialize;
use syncline_db::run::models::RunScope;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    /// Defaults to a full run.
    pub scope: Option<RunScope>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitEditRequest {
    pub opportunity_id: String,
    /// `close_date`, `delivery_date` or `invoice_date`.
    pub field: String,
    pub new_value: NaiveDate,
    pub origin_user: String,
    /// What the user saw before editing. For `close_date` the CRM forecast
    /// date is used when omitted.
    pub previous_value: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
}
