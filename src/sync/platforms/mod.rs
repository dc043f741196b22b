pub mod ga4;
pub mod google_ads;
pub mod meta;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::SyncError;
use crate::config::SyncConfig;
use crate::database::models::{AdMetric, Integration, Platform, RecordFailure};

pub use ga4::Ga4Client;
pub use google_ads::GoogleAdsClient;
pub use meta::MetaAdsClient;

/// One upstream row: normalized, or the reason it could not be
pub type FetchedRecord = Result<AdMetric, RecordFailure>;

/// Inclusive day range requested from a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    /// The `days` days ending today (UTC)
    pub fn trailing(days: u32) -> Self {
        let until = Utc::now().date_naive();
        let since = until - Duration::days(i64::from(days.max(1)) - 1);
        Self { since, until }
    }
}

/// Pulls daily campaign metrics for one ad account
#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch every row in `range`. A transport or HTTP failure fails the whole
    /// fetch; rows that merely fail to normalize come back as `Err` entries.
    async fn fetch_metrics(&self, integration: &Integration, range: DateRange) -> Result<Vec<FetchedRecord>, SyncError>;
}

#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.clients.insert(client.platform(), client);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformClient>> {
        self.clients.get(&platform).cloned()
    }

    /// HTTP clients for every supported platform
    pub fn from_config(config: &SyncConfig, http: reqwest::Client) -> Self {
        Self::new()
            .with_client(Arc::new(MetaAdsClient::new(http.clone(), &config.meta_api_base)))
            .with_client(Arc::new(GoogleAdsClient::new(
                http.clone(),
                &config.google_ads_api_base,
                config.google_ads_developer_token.clone(),
            )))
            .with_client(Arc::new(Ga4Client::new(http, &config.ga4_api_base)))
    }
}

/// Turn a non-success response into an upstream error, keeping a short body excerpt
async fn upstream_error(platform: Platform, response: reqwest::Response) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(300).collect();
    SyncError::upstream(platform, Some(status.as_u16()), format!("HTTP {}: {}", status, excerpt))
}

fn transport_error(platform: Platform, err: reqwest::Error) -> SyncError {
    SyncError::upstream(platform, err.status().map(|s| s.as_u16()), err.to_string())
}

/// Platforms send counters as strings or numbers; accept both
fn parse_count(value: Option<&serde_json::Value>, field: &str) -> Result<i64, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n.as_i64().ok_or_else(|| format!("{} is not an integer", field)),
        Some(serde_json::Value::String(s)) => s.trim().parse().map_err(|_| format!("{} is not an integer: {:?}", field, s)),
        Some(other) => Err(format!("{} has unexpected type: {}", field, other)),
    }
}

fn parse_decimal(value: Option<&serde_json::Value>, field: &str) -> Result<Decimal, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Decimal::ZERO),
        Some(serde_json::Value::Number(n)) => {
            Decimal::from_str(&n.to_string()).map_err(|_| format!("{} is not a decimal: {}", field, n))
        }
        Some(serde_json::Value::String(s)) => {
            Decimal::from_str(s.trim()).map_err(|_| format!("{} is not a decimal: {:?}", field, s))
        }
        Some(other) => Err(format!("{} has unexpected type: {}", field, other)),
    }
}
