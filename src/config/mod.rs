use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub sync: SyncConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub run_migrations: bool,
}

/// Limit and window for one named rate-limit policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_rate_limiting: bool,
    pub auth_rate_limit: RateLimitSettings,
    pub chat_rate_limit: RateLimitSettings,
    pub api_rate_limit: RateLimitSettings,
    pub trust_forwarded_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    #[serde(skip_serializing)]
    pub cron_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enable_scheduler: bool,
    pub interval_secs: u64,
    pub lease_ttl_secs: u64,
    pub max_concurrent_runs: usize,
    /// Base URL this service is reachable on; the cron trigger calls back into it
    pub self_base_url: String,
    pub request_timeout_secs: u64,
    /// Upper bound for one `/cron/run` -> `/cron/sync-all` round trip
    pub cron_timeout_secs: u64,
    pub meta_api_base: String,
    pub google_ads_api_base: String,
    pub ga4_api_base: String,
    pub google_ads_developer_token: Option<String>,
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub completion_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_message_chars: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_RUN_MIGRATIONS") {
            self.database.run_migrations = v.parse().unwrap_or(self.database.run_migrations);
        }

        // API overrides
        if let Ok(v) = env::var("PORT") {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_RATE_LIMITING") {
            self.api.enable_rate_limiting = v.parse().unwrap_or(self.api.enable_rate_limiting);
        }
        if let Ok(v) = env::var("API_TRUST_FORWARDED_HEADERS") {
            self.api.trust_forwarded_headers = v.parse().unwrap_or(self.api.trust_forwarded_headers);
        }
        override_rate_limit(&mut self.api.auth_rate_limit, "API_AUTH_RATE_LIMIT");
        override_rate_limit(&mut self.api.chat_rate_limit, "API_CHAT_RATE_LIMIT");
        override_rate_limit(&mut self.api.api_rate_limit, "API_GENERAL_RATE_LIMIT");

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("CRON_SECRET") {
            self.security.cron_secret = v;
        }

        // Sync overrides
        if let Ok(v) = env::var("SYNC_ENABLE_SCHEDULER") {
            self.sync.enable_scheduler = v.parse().unwrap_or(self.sync.enable_scheduler);
        }
        if let Ok(v) = env::var("SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = v.parse().unwrap_or(self.sync.interval_secs);
        }
        if let Ok(v) = env::var("SYNC_LEASE_TTL_SECS") {
            self.sync.lease_ttl_secs = v.parse().unwrap_or(self.sync.lease_ttl_secs);
        }
        if let Ok(v) = env::var("SYNC_MAX_CONCURRENT_RUNS") {
            self.sync.max_concurrent_runs = v.parse().unwrap_or(self.sync.max_concurrent_runs);
        }
        if let Ok(v) = env::var("SYNC_SELF_BASE_URL") {
            self.sync.self_base_url = v;
        }
        if let Ok(v) = env::var("SYNC_REQUEST_TIMEOUT_SECS") {
            self.sync.request_timeout_secs = v.parse().unwrap_or(self.sync.request_timeout_secs);
        }
        if let Ok(v) = env::var("SYNC_CRON_TIMEOUT_SECS") {
            self.sync.cron_timeout_secs = v.parse().unwrap_or(self.sync.cron_timeout_secs);
        }
        if let Ok(v) = env::var("META_API_BASE") {
            self.sync.meta_api_base = v;
        }
        if let Ok(v) = env::var("GOOGLE_ADS_API_BASE") {
            self.sync.google_ads_api_base = v;
        }
        if let Ok(v) = env::var("GA4_API_BASE") {
            self.sync.ga4_api_base = v;
        }
        if let Ok(v) = env::var("GOOGLE_ADS_DEVELOPER_TOKEN") {
            self.sync.google_ads_developer_token = Some(v);
        }
        if let Ok(v) = env::var("SYNC_LOOKBACK_DAYS") {
            self.sync.lookback_days = v.parse().unwrap_or(self.sync.lookback_days);
        }

        // Chat overrides
        if let Ok(v) = env::var("CHAT_COMPLETION_URL") {
            self.chat.completion_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("CHAT_API_KEY") {
            self.chat.api_key = Some(v);
        }
        if let Ok(v) = env::var("CHAT_MODEL") {
            self.chat.model = v;
        }
        if let Ok(v) = env::var("CHAT_TIMEOUT_SECS") {
            self.chat.timeout_secs = v.parse().unwrap_or(self.chat.timeout_secs);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                run_migrations: true,
            },
            api: ApiConfig {
                port: 3000,
                enable_rate_limiting: false,
                auth_rate_limit: RateLimitSettings { requests: 5, window_secs: 15 * 60 },
                chat_rate_limit: RateLimitSettings { requests: 10, window_secs: 60 },
                api_rate_limit: RateLimitSettings { requests: 100, window_secs: 60 },
                trust_forwarded_headers: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: "dev-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                cron_secret: "dev-cron-secret".to_string(),
            },
            sync: SyncConfig {
                enable_scheduler: false,
                interval_secs: 30 * 60,
                lease_ttl_secs: 25 * 60,
                max_concurrent_runs: 4,
                self_base_url: "http://127.0.0.1:3000".to_string(),
                request_timeout_secs: 60,
                cron_timeout_secs: 60 * 60,
                meta_api_base: "https://graph.facebook.com/v19.0".to_string(),
                google_ads_api_base: "https://googleads.googleapis.com/v16".to_string(),
                ga4_api_base: "https://analyticsdata.googleapis.com/v1beta".to_string(),
                google_ads_developer_token: None,
                lookback_days: 7,
            },
            chat: ChatConfig {
                completion_url: None,
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                max_message_chars: 4000,
            },
        }
    }

    pub fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.api.enable_rate_limiting = true;
        config.api.trust_forwarded_headers = true;
        config.security.cors_origins = vec!["https://staging.emarketer.pro".to_string()];
        config.security.jwt_secret = String::new();
        config.security.jwt_expiry_hours = 24;
        config.security.cron_secret = String::new();
        config.sync.enable_scheduler = true;
        config
    }

    pub fn production() -> Self {
        let mut config = Self::staging();
        config.environment = Environment::Production;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.security.cors_origins = vec!["https://app.emarketer.pro".to_string()];
        config.security.jwt_expiry_hours = 12;
        config.sync.max_concurrent_runs = 8;
        config
    }
}

/// Parses `<requests>/<window_secs>` overrides such as `API_CHAT_RATE_LIMIT=10/60`
fn override_rate_limit(target: &mut RateLimitSettings, var: &str) {
    let Ok(raw) = env::var(var) else {
        return;
    };
    match parse_rate_limit(&raw) {
        Some(parsed) => *target = parsed,
        None => tracing::warn!("Ignoring malformed {}={:?}, expected <requests>/<window_secs>", var, raw),
    }
}

fn parse_rate_limit(raw: &str) -> Option<RateLimitSettings> {
    let (requests, window) = raw.split_once('/')?;
    let requests = requests.trim().parse().ok()?;
    let window_secs = window.trim().parse().ok()?;
    if requests == 0 || window_secs == 0 {
        return None;
    }
    Some(RateLimitSettings { requests, window_secs })
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
