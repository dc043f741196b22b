use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Fires `POST {base}/cron/run` on a fixed interval, the same call an
/// external cron would make.
#[derive(Clone)]
pub struct CronScheduler {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    every: Duration,
}

/// What the cron endpoint answered
#[derive(Debug)]
pub struct TriggerOutcome {
    pub status: StatusCode,
    pub body: Value,
}

impl CronScheduler {
    pub fn new(http: reqwest::Client, base_url: &str, secret: &str, every: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            every,
        }
    }

    pub fn every(&self) -> Duration {
        self.every
    }

    /// One-shot trigger
    pub async fn trigger(&self) -> Result<TriggerOutcome, reqwest::Error> {
        let response = self
            .http
            .post(format!("{}/cron/run", self.base_url))
            .bearer_auth(&self.secret)
            .send()
            .await?;
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        Ok(TriggerOutcome { status, body })
    }

    /// Runs until the task is aborted. The first tick waits a full interval
    /// so a fresh deploy does not sync immediately.
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.every, self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Cron scheduler running every {}s against {}", self.every.as_secs(), self.base_url);

        loop {
            ticker.tick().await;
            match self.trigger().await {
                Ok(outcome) if outcome.status.is_success() => {
                    tracing::info!("Scheduled sync finished with {}", outcome.status);
                }
                Ok(outcome) => tracing::warn!("Scheduled sync returned {}: {}", outcome.status, outcome.body),
                Err(e) => tracing::error!("Scheduled sync could not reach {}: {}", self.base_url, e),
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
