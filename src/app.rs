//! Router assembly and shared handler state.

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::access::AccessGuard;
use crate::config::AppConfig;
use crate::database::Store;
use crate::handlers::{cron, protected, public};
use crate::middleware::{
    rate_limit_middleware, session_auth_middleware, validate_company_middleware, RateLimitGate,
};
use crate::rate_limit::{FixedWindowLimiter, MemoryRateLimitStore, RateLimitPolicy, RateLimitStore};
use crate::sync::{PlatformRegistry, SyncOrchestrator};

/// One gate per policy, all sharing one counter store
#[derive(Clone)]
pub struct RateLimits {
    pub auth: RateLimitGate,
    pub chat: RateLimitGate,
    pub api: RateLimitGate,
}

impl RateLimits {
    pub fn new(config: &AppConfig, store: Arc<dyn RateLimitStore>) -> Self {
        let trust = config.api.trust_forwarded_headers;
        let gate = |policy: RateLimitPolicy| RateLimitGate::new(FixedWindowLimiter::new(policy, store.clone()), trust);
        Self {
            auth: gate(RateLimitPolicy::auth(config.api.auth_rate_limit)),
            chat: gate(RateLimitPolicy::chat(config.api.chat_rate_limit)),
            api: gate(RateLimitPolicy::api(config.api.api_rate_limit)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub access: AccessGuard,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub limits: RateLimits,
    pub http: reqwest::Client,
    /// Set when backed by Postgres; used by the health check
    pub pool: Option<PgPool>,
}

impl AppState {
    /// State with the real platform clients
    pub fn new<S: Store + 'static>(config: AppConfig, store: Arc<S>, http: reqwest::Client) -> Self {
        let platforms = PlatformRegistry::from_config(&config.sync, http.clone());
        Self::with_platforms(config, store, http, platforms)
    }

    pub fn with_platforms<S: Store + 'static>(
        config: AppConfig,
        store: Arc<S>,
        http: reqwest::Client,
        platforms: PlatformRegistry,
    ) -> Self {
        let orchestrator = SyncOrchestrator::new(store.clone(), platforms, &config.sync);
        let limits = RateLimits::new(&config, Arc::new(MemoryRateLimitStore::new()));
        Self {
            access: AccessGuard::new(store.clone()),
            store,
            orchestrator: Arc::new(orchestrator),
            limits,
            http,
            pool: None,
            config: Arc::new(config),
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(session_routes(&state))
        .merge(api_routes(&state))
        .merge(chat_routes(&state))
        .merge(cron_routes())
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_routes(state: &AppState) -> Router<AppState> {
    let routes = Router::new()
        .route("/auth/refresh", post(public::session_refresh))
        .route_layer(from_fn_with_state(state.clone(), session_auth_middleware));
    with_rate_limit(routes, state, &state.limits.auth)
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let company = Router::new()
        .route("/api/companies/:company_id", get(protected::company_get))
        .route(
            "/api/companies/:company_id/integrations",
            get(protected::integrations_get).post(protected::integrations_post),
        )
        .route(
            "/api/companies/:company_id/integrations/:integration_id",
            delete(protected::integration_delete),
        )
        .route(
            "/api/companies/:company_id/sync",
            get(protected::sync_get).post(protected::sync_post),
        )
        .route("/api/companies/:company_id/sync/:log_id/cancel", post(protected::sync_cancel))
        .route_layer(from_fn_with_state(state.clone(), validate_company_middleware));

    let routes = Router::new()
        .route("/api/me/companies", get(protected::me_companies))
        .route("/api/me/integrations", get(protected::me_integrations))
        .merge(company)
        .route_layer(from_fn_with_state(state.clone(), session_auth_middleware));
    with_rate_limit(routes, state, &state.limits.api)
}

fn chat_routes(state: &AppState) -> Router<AppState> {
    let routes = Router::new()
        .route("/api/companies/:company_id/chat", post(protected::chat_post))
        .route_layer(from_fn_with_state(state.clone(), validate_company_middleware))
        .route_layer(from_fn_with_state(state.clone(), session_auth_middleware));
    with_rate_limit(routes, state, &state.limits.chat)
}

fn cron_routes() -> Router<AppState> {
    Router::new()
        .route("/cron/run", post(cron::cron_run))
        .route("/cron/sync-all", post(cron::cron_sync_all))
}

/// Outermost layer of a route group, so throttling happens before auth
fn with_rate_limit(routes: Router<AppState>, state: &AppState, gate: &RateLimitGate) -> Router<AppState> {
    if state.config.api.enable_rate_limiting {
        routes.route_layer(from_fn_with_state(gate.clone(), rate_limit_middleware))
    } else {
        routes
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
