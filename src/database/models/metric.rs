use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One normalized daily campaign row written by a sync run.
/// Unique per (integration_id, campaign_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMetric {
    pub integration_id: Uuid,
    pub campaign_id: String,
    pub campaign_name: String,
    pub date: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: Decimal,
    pub conversions: Decimal,
}

/// Whether an upsert inserted a new row or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricWrite {
    Created,
    Updated,
}
