use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashSet;

use super::{parse_count, parse_decimal, transport_error, upstream_error, DateRange, FetchedRecord, PlatformClient};
use crate::database::models::{AdMetric, Integration, Platform, RecordFailure};
use crate::sync::SyncError;

const INSIGHT_FIELDS: &str = "campaign_id,campaign_name,impressions,clicks,spend,actions";

// Hard stop for insights paging
const MAX_PAGES: usize = 200;

// Action types counted as conversions
const CONVERSION_ACTIONS: &[&str] = &["purchase", "lead", "complete_registration"];

/// Meta Graph API campaign insights
pub struct MetaAdsClient {
    http: reqwest::Client,
    base_url: String,
}

impl MetaAdsClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn insights_url(&self, account_id: &str) -> String {
        let account = account_id.trim_start_matches("act_");
        format!("{}/act_{}/insights", self.base_url, account)
    }
}

#[async_trait]
impl PlatformClient for MetaAdsClient {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    async fn fetch_metrics(&self, integration: &Integration, range: DateRange) -> Result<Vec<FetchedRecord>, SyncError> {
        let time_range = json!({ "since": range.since.to_string(), "until": range.until.to_string() }).to_string();
        let mut request = self.http.get(self.insights_url(&integration.account_id)).query(&[
            ("level", "campaign"),
            ("fields", INSIGHT_FIELDS),
            ("time_increment", "1"),
            ("time_range", time_range.as_str()),
            ("limit", "500"),
            ("access_token", integration.access_token.as_str()),
        ]);

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut fetched = 0;
        loop {
            let response = request.send().await.map_err(|e| transport_error(Platform::Meta, e))?;
            if !response.status().is_success() {
                return Err(upstream_error(Platform::Meta, response).await);
            }
            let page: Value = response.json().await.map_err(|e| transport_error(Platform::Meta, e))?;
            let (rows, next) = parse_insights_page(integration, &page);
            records.extend(rows);
            fetched += 1;

            match next_page(next, &mut seen, fetched) {
                // Paging URLs already carry the token and the query
                Some(url) => request = self.http.get(url),
                None => break,
            }
        }

        tracing::debug!("Meta returned {} rows for account {}", records.len(), integration.account_id);
        Ok(records)
    }
}

/// The page to request after `fetched` pages, or `None` once paging ends,
/// loops back to a URL already requested, or reaches [`MAX_PAGES`]
fn next_page(next: Option<String>, seen: &mut HashSet<String>, fetched: usize) -> Option<String> {
    let url = next?;
    if fetched >= MAX_PAGES {
        tracing::warn!("Meta insights paging stopped after {} pages", fetched);
        return None;
    }
    if !seen.insert(url.clone()) {
        tracing::warn!("Meta insights paging repeated a cursor after {} pages", fetched);
        return None;
    }
    Some(url)
}

/// Split one insights page into rows and the next-page URL
pub(crate) fn parse_insights_page(integration: &Integration, page: &Value) -> (Vec<FetchedRecord>, Option<String>) {
    let rows = page["data"]
        .as_array()
        .map(|rows| rows.iter().map(|row| parse_insight(integration, row)).collect())
        .unwrap_or_default();
    let next = page["paging"]["next"].as_str().map(str::to_string);
    (rows, next)
}

fn parse_insight(integration: &Integration, row: &Value) -> FetchedRecord {
    let campaign_id = row["campaign_id"].as_str().unwrap_or_default().to_string();
    let reference = if campaign_id.is_empty() { "meta:unknown".to_string() } else { format!("meta:{}", campaign_id) };
    let fail = |reason: String| RecordFailure { reference: reference.clone(), reason };

    if campaign_id.is_empty() {
        return Err(fail("missing campaign_id".to_string()));
    }
    let date = row["date_start"]
        .as_str()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| fail("missing or invalid date_start".to_string()))?;

    let conversions = match row["actions"].as_array() {
        Some(actions) => actions
            .iter()
            .filter(|a| a["action_type"].as_str().is_some_and(|t| CONVERSION_ACTIONS.contains(&t)))
            .map(|a| parse_decimal(a.get("value"), "actions.value"))
            .sum::<Result<Decimal, String>>()
            .map_err(fail)?,
        None => Decimal::ZERO,
    };

    Ok(AdMetric {
        integration_id: integration.id,
        campaign_name: row["campaign_name"].as_str().unwrap_or(&campaign_id).to_string(),
        campaign_id,
        date,
        impressions: parse_count(row.get("impressions"), "impressions").map_err(fail)?,
        clicks: parse_count(row.get("clicks"), "clicks").map_err(fail)?,
        spend: parse_decimal(row.get("spend"), "spend").map_err(fail)?,
        conversions,
    })
}
