use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use super::{parse_count, parse_decimal, transport_error, upstream_error, DateRange, FetchedRecord, PlatformClient};
use crate::database::models::{AdMetric, Integration, Platform, RecordFailure};
use crate::sync::SyncError;

// Order matters: rows come back positionally
const DIMENSIONS: [&str; 3] = ["date", "sessionCampaignId", "sessionCampaignName"];
const METRICS: [&str; 4] = ["advertiserAdImpressions", "advertiserAdClicks", "advertiserAdCost", "conversions"];

/// GA4 Data API `runReport` by campaign and day
pub struct Ga4Client {
    http: reqwest::Client,
    base_url: String,
}

impl Ga4Client {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn report_url(&self, property_id: &str) -> String {
        let property = property_id.trim_start_matches("properties/");
        format!("{}/properties/{}:runReport", self.base_url, property)
    }
}

fn report_request(range: DateRange) -> Value {
    json!({
        "dateRanges": [{ "startDate": range.since.to_string(), "endDate": range.until.to_string() }],
        "dimensions": DIMENSIONS.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
        "metrics": METRICS.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
        "limit": 10000
    })
}

#[async_trait]
impl PlatformClient for Ga4Client {
    fn platform(&self) -> Platform {
        Platform::Ga4
    }

    async fn fetch_metrics(&self, integration: &Integration, range: DateRange) -> Result<Vec<FetchedRecord>, SyncError> {
        let response = self
            .http
            .post(self.report_url(&integration.account_id))
            .bearer_auth(&integration.access_token)
            .json(&report_request(range))
            .send()
            .await
            .map_err(|e| transport_error(Platform::Ga4, e))?;

        if !response.status().is_success() {
            return Err(upstream_error(Platform::Ga4, response).await);
        }

        let report: Value = response.json().await.map_err(|e| transport_error(Platform::Ga4, e))?;
        Ok(parse_report(integration, &report))
    }
}

pub(crate) fn parse_report(integration: &Integration, report: &Value) -> Vec<FetchedRecord> {
    report["rows"]
        .as_array()
        .map(|rows| rows.iter().map(|row| parse_row(integration, row)).collect())
        .unwrap_or_default()
}

fn parse_row(integration: &Integration, row: &Value) -> FetchedRecord {
    let dimension = |i: usize| row["dimensionValues"][i]["value"].as_str().unwrap_or_default();
    let metric = |i: usize| row["metricValues"].get(i).map(|m| &m["value"]);

    let campaign_id = dimension(1).to_string();
    let reference = format!("ga4:{}", if campaign_id.is_empty() { "unknown" } else { &campaign_id });
    let fail = |reason: String| RecordFailure { reference: reference.clone(), reason };

    // GA4 reports traffic without a campaign as "(not set)"
    if campaign_id.is_empty() || campaign_id == "(not set)" {
        return Err(fail("row has no campaign".to_string()));
    }
    let date = NaiveDate::parse_from_str(dimension(0), "%Y%m%d")
        .map_err(|_| fail(format!("invalid date {:?}", dimension(0))))?;
    let campaign_name = match dimension(2) {
        "" => campaign_id.clone(),
        name => name.to_string(),
    };

    Ok(AdMetric {
        integration_id: integration.id,
        campaign_id,
        campaign_name,
        date,
        impressions: parse_count(metric(0), METRICS[0]).map_err(fail)?,
        clicks: parse_count(metric(1), METRICS[1]).map_err(fail)?,
        spend: parse_decimal(metric(2), METRICS[2]).map_err(fail)?,
        conversions: parse_decimal(metric(3), METRICS[3]).map_err(fail)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::IntegrationOwner;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn integration() -> Integration {
        Integration {
            id: Uuid::new_v4(),
            owner: IntegrationOwner::Company(Uuid::new_v4()),
            platform: Platform::Ga4,
            account_id: "properties/987".to_string(),
            account_name: "Site".to_string(),
            access_token: "token".to_string(),
            refresh_token: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn parses_positional_rows() {
        let report = json!({
            "rows": [
                {
                    "dimensionValues": [{ "value": "20260105" }, { "value": "77" }, { "value": "Retarget" }],
                    "metricValues": [{ "value": "900" }, { "value": "30" }, { "value": "45.5" }, { "value": "2.25" }]
                },
                {
                    "dimensionValues": [{ "value": "20260105" }, { "value": "(not set)" }, { "value": "(not set)" }],
                    "metricValues": [{ "value": "0" }, { "value": "0" }, { "value": "0" }, { "value": "0" }]
                }
            ]
        });

        let rows = parse_report(&integration(), &report);
        let metric = rows[0].as_ref().unwrap();
        assert_eq!(metric.date, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert_eq!(metric.campaign_name, "Retarget");
        assert_eq!(metric.impressions, 900);
        assert_eq!(metric.spend, Decimal::new(455, 1));
        assert_eq!(metric.conversions, Decimal::new(225, 2));
        assert!(rows[1].is_err());
    }

    #[test]
    fn empty_report_has_no_rows() {
        assert!(parse_report(&integration(), &json!({ "rowCount": 0 })).is_empty());
    }

    #[test]
    fn builds_property_url() {
        let client = Ga4Client::new(reqwest::Client::new(), "https://analyticsdata.googleapis.com/v1beta");
        assert_eq!(
            client.report_url("properties/987"),
            "https://analyticsdata.googleapis.com/v1beta/properties/987:runReport"
        );
        assert_eq!(report_request(DateRange::trailing(1))["metrics"].as_array().unwrap().len(), 4);
    }
}
