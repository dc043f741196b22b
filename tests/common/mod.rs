#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use emarketer_api::auth::{generate_jwt, Claims};
use emarketer_api::config::AppConfig;
use emarketer_api::database::models::{
    AdMetric, Company, Integration, IntegrationOwner, NewIntegration, Platform, RecordFailure, Role,
};
use emarketer_api::database::{IntegrationStore, MemoryStore};
use emarketer_api::sync::{DateRange, FetchedRecord, PlatformClient, PlatformRegistry, SyncError};
use emarketer_api::{app, AppState};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const CRON_SECRET: &str = "test-cron-secret";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.api.enable_rate_limiting = true;
    config.security.jwt_secret = JWT_SECRET.to_string();
    config.security.cron_secret = CRON_SECRET.to_string();
    config.chat.completion_url = None;
    config
}

/// Platform client answering with a fixed set of rows
pub struct StaticClient {
    pub platform: Platform,
    pub records: Vec<FetchedRecord>,
}

#[async_trait]
impl PlatformClient for StaticClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_metrics(&self, integration: &Integration, _: DateRange) -> Result<Vec<FetchedRecord>, SyncError> {
        Ok(self
            .records
            .iter()
            .cloned()
            .map(|record| {
                record.map(|mut metric| {
                    metric.integration_id = integration.id;
                    metric
                })
            })
            .collect())
    }
}

/// Answers like the wrapped client after a delay
pub struct SlowClient {
    pub inner: StaticClient,
    pub delay: Duration,
}

#[async_trait]
impl PlatformClient for SlowClient {
    fn platform(&self) -> Platform {
        self.inner.platform
    }

    async fn fetch_metrics(&self, integration: &Integration, range: DateRange) -> Result<Vec<FetchedRecord>, SyncError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_metrics(integration, range).await
    }
}

pub fn good_row(campaign: &str) -> FetchedRecord {
    Ok(AdMetric {
        integration_id: Uuid::nil(),
        campaign_id: campaign.to_string(),
        campaign_name: format!("Campaign {}", campaign),
        date: NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date"),
        impressions: 1000,
        clicks: 10,
        spend: Decimal::new(1999, 2),
        conversions: Decimal::TWO,
    })
}

pub fn bad_row(campaign: &str) -> FetchedRecord {
    Err(RecordFailure {
        reference: format!("meta:{}", campaign),
        reason: "missing date_start".to_string(),
    })
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), PlatformRegistry::new())
    }

    pub fn with(config: AppConfig, platforms: PlatformRegistry) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::with_platforms(config, store.clone(), reqwest::Client::new(), platforms);
        let router = app(state.clone());
        Self { store, state, router }
    }

    pub fn token(&self, user_id: Uuid) -> String {
        let claims = Claims::new(user_id, Some(format!("{}@example.com", user_id)), 1);
        generate_jwt(&claims, JWT_SECRET).expect("token")
    }

    pub async fn company_with_member(&self, name: &str, user_id: Uuid, role: Role) -> Company {
        let company = self.store.insert_company(name).await;
        self.store.insert_membership(user_id, company.id, role).await;
        company
    }

    pub async fn company_integration(&self, company_id: Uuid, platform: Platform) -> Integration {
        self.store
            .upsert_integration(NewIntegration {
                owner: IntegrationOwner::Company(company_id),
                platform,
                account_id: format!("acct-{}", platform),
                account_name: "Main account".to_string(),
                access_token: "platform-token".to_string(),
                refresh_token: None,
            })
            .await
            .expect("integration")
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok(TestResponse { status, headers, body })
    }

    /// Serves the router on a real port; returns its base URL
    pub async fn spawn(config: AppConfig, platforms: PlatformRegistry) -> Result<(String, Arc<MemoryStore>)> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut config = config;
        config.sync.self_base_url = base_url.clone();
        let test_app = Self::with(config, platforms);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let service = test_app.router.into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, service).await {
                tracing::error!("test server stopped: {}", e);
            }
        });
        Ok((base_url, test_app.store))
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub fn request(method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", "198.51.100.10");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn get(path: &str, token: &str) -> Request<Body> {
    request(Method::GET, path, Some(token), None)
}

pub fn post(path: &str, token: &str, body: Option<Value>) -> Request<Body> {
    request(Method::POST, path, Some(token), body)
}
