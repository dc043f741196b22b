use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use emarketer_api::config::{self, Environment};
use emarketer_api::database::{DatabaseManager, MemoryStore, PgStore};
use emarketer_api::sync::CronScheduler;
use emarketer_api::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn")),
        )
        .init();

    let config = config::config().clone();
    tracing::info!("Starting eMarketer API in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set outside development");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sync.request_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let state = match &config.database.url {
        Some(_) => {
            let pool = DatabaseManager::connect(&config.database).await?;
            if config.database.run_migrations {
                DatabaseManager::migrate(&pool).await?;
            }
            AppState::new(config.clone(), Arc::new(PgStore::new(pool.clone())), http.clone()).with_pool(pool)
        }
        None => {
            if !matches!(config.environment, Environment::Development) {
                anyhow::bail!("DATABASE_URL is required outside development");
            }
            tracing::warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            AppState::new(config.clone(), Arc::new(MemoryStore::new()), http.clone())
        }
    };

    if config.sync.enable_scheduler {
        let cron_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.sync.cron_timeout_secs))
            .build()
            .context("failed to build cron HTTP client")?;
        CronScheduler::new(
            cron_http,
            &config.sync.self_base_url,
            &config.security.cron_secret,
            Duration::from_secs(config.sync.interval_secs),
        )
        .spawn();
    }

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("eMarketer API listening on http://{}", bind_addr);

    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;
    Ok(())
}
