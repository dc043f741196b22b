use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use super::{parse_count, parse_decimal, transport_error, upstream_error, DateRange, FetchedRecord, PlatformClient};
use crate::database::models::{AdMetric, Integration, Platform, RecordFailure};
use crate::sync::SyncError;

/// Google Ads `googleAds:searchStream` campaign report
pub struct GoogleAdsClient {
    http: reqwest::Client,
    base_url: String,
    developer_token: Option<String>,
}

impl GoogleAdsClient {
    pub fn new(http: reqwest::Client, base_url: &str, developer_token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            developer_token,
        }
    }

    fn search_url(&self, customer_id: &str) -> String {
        let customer: String = customer_id.chars().filter(char::is_ascii_digit).collect();
        format!("{}/customers/{}/googleAds:searchStream", self.base_url, customer)
    }
}

fn campaign_query(range: DateRange) -> String {
    format!(
        "SELECT campaign.id, campaign.name, segments.date, metrics.impressions, metrics.clicks, \
         metrics.cost_micros, metrics.conversions FROM campaign \
         WHERE segments.date BETWEEN '{}' AND '{}'",
        range.since, range.until
    )
}

#[async_trait]
impl PlatformClient for GoogleAdsClient {
    fn platform(&self) -> Platform {
        Platform::GoogleAds
    }

    async fn fetch_metrics(&self, integration: &Integration, range: DateRange) -> Result<Vec<FetchedRecord>, SyncError> {
        let developer_token = self
            .developer_token
            .as_deref()
            .ok_or_else(|| SyncError::upstream(Platform::GoogleAds, None, "developer token not configured"))?;

        let response = self
            .http
            .post(self.search_url(&integration.account_id))
            .bearer_auth(&integration.access_token)
            .header("developer-token", developer_token)
            .json(&json!({ "query": campaign_query(range) }))
            .send()
            .await
            .map_err(|e| transport_error(Platform::GoogleAds, e))?;

        if !response.status().is_success() {
            return Err(upstream_error(Platform::GoogleAds, response).await);
        }

        let batches: Value = response.json().await.map_err(|e| transport_error(Platform::GoogleAds, e))?;
        Ok(parse_search_stream(integration, &batches))
    }
}

/// searchStream answers with an array of batches, each holding `results`
pub(crate) fn parse_search_stream(integration: &Integration, batches: &Value) -> Vec<FetchedRecord> {
    batches
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|batch| batch["results"].as_array())
        .flatten()
        .map(|row| parse_result(integration, row))
        .collect()
}

fn parse_result(integration: &Integration, row: &Value) -> FetchedRecord {
    let campaign_id = match &row["campaign"]["id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    let reference = format!("google-ads:{}", if campaign_id.is_empty() { "unknown" } else { &campaign_id });
    let fail = |reason: String| RecordFailure { reference: reference.clone(), reason };

    if campaign_id.is_empty() {
        return Err(fail("missing campaign.id".to_string()));
    }
    let date = row["segments"]["date"]
        .as_str()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| fail("missing or invalid segments.date".to_string()))?;

    let metrics = &row["metrics"];
    let cost_micros = parse_count(metrics.get("costMicros"), "metrics.costMicros").map_err(fail)?;

    Ok(AdMetric {
        integration_id: integration.id,
        campaign_name: row["campaign"]["name"].as_str().unwrap_or(&campaign_id).to_string(),
        campaign_id,
        date,
        impressions: parse_count(metrics.get("impressions"), "metrics.impressions").map_err(fail)?,
        clicks: parse_count(metrics.get("clicks"), "metrics.clicks").map_err(fail)?,
        spend: Decimal::new(cost_micros, 6),
        conversions: parse_decimal(metrics.get("conversions"), "metrics.conversions").map_err(fail)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::IntegrationOwner;
    use chrono::Utc;
    use uuid::Uuid;

    fn integration() -> Integration {
        Integration {
            id: Uuid::new_v4(),
            owner: IntegrationOwner::User(Uuid::new_v4()),
            platform: Platform::GoogleAds,
            account_id: "123-456-7890".to_string(),
            account_name: "Search".to_string(),
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn flattens_batches_and_converts_micros() {
        let batches = json!([
            { "results": [
                {
                    "campaign": { "id": "111", "name": "Brand" },
                    "segments": { "date": "2026-02-10" },
                    "metrics": { "impressions": "500", "clicks": "40", "costMicros": "12500000", "conversions": 3.5 }
                }
            ]},
            { "results": [
                { "campaign": { "id": "222" }, "segments": {}, "metrics": {} }
            ]},
            { "fieldMask": "campaign.id" }
        ]);

        let rows = parse_search_stream(&integration(), &batches);
        assert_eq!(rows.len(), 2);

        let metric = rows[0].as_ref().unwrap();
        assert_eq!(metric.campaign_name, "Brand");
        assert_eq!(metric.spend, Decimal::new(125, 1));
        assert_eq!(metric.conversions, Decimal::new(35, 1));
        assert_eq!(metric.clicks, 40);

        let failure = rows[1].as_ref().unwrap_err();
        assert_eq!(failure.reference, "google-ads:222");
    }

    #[test]
    fn strips_customer_id_dashes() {
        let client = GoogleAdsClient::new(reqwest::Client::new(), "https://googleads.googleapis.com/v16", None);
        assert_eq!(
            client.search_url("123-456-7890"),
            "https://googleads.googleapis.com/v16/customers/1234567890/googleAds:searchStream"
        );
    }

    #[tokio::test]
    async fn missing_developer_token_is_an_upstream_failure() {
        let client = GoogleAdsClient::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
        let result = client.fetch_metrics(&integration(), DateRange::trailing(1)).await;
        assert!(matches!(result, Err(SyncError::Upstream { platform: Platform::GoogleAds, status: None, .. })));
    }

    #[test]
    fn query_covers_range() {
        let range = DateRange {
            since: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            until: NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
        };
        assert!(campaign_query(range).ends_with("BETWEEN '2026-01-01' AND '2026-01-07'"));
    }
}
