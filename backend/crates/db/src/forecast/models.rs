use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForecastStage {
    Open,
    Won,
    Lost,
}

impl ForecastStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

impl FromStr for ForecastStage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            _ => Err(format!("unknown forecast stage: {value}")),
        }
    }
}

/// CRM-side expectation for an opportunity. The CRM is authoritative here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpportunityForecast {
    /// ERP sales-order id the opportunity is linked to.
    pub opportunity_id: String,
    pub name: String,
    pub forecast_amount: Decimal,
    pub expected_date: NaiveDate,
    /// Overrides the configured tolerance, as a fraction (0.05 = 5%).
    pub tolerance_pct: Option<f64>,
    pub stage: ForecastStage,
    pub updated_at: DateTime<Utc>,
}

impl OpportunityForecast {
    pub fn is_active(&self) -> bool {
        self.stage != ForecastStage::Lost
    }
}
