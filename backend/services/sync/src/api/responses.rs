use serde::Serialize;
use syncline_common::types::ServiceInfo;
use syncline_db::discrepancy::models::OpenDiscrepancy;
use syncline_db::edit::models::SalesDateEdit;
use syncline_db::run::models::SyncRun;

use crate::queue::TriggerOutcome;

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    #[serde(flatten)]
    pub service: ServiceInfo,
    pub uptime_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub outcome: TriggerOutcome,
}

#[derive(Debug, Serialize)]
pub struct SubmitEditResponse {
    pub data: SalesDateEdit,
    pub outcome: TriggerOutcome,
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub data: Vec<SyncRun>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ListDiscrepanciesResponse {
    pub data: Vec<OpenDiscrepancy>,
    pub count: usize,
}

