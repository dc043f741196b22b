use clap::Subcommand;
use std::time::Duration;

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;
use crate::config;
use crate::sync::CronScheduler;

#[derive(Subcommand)]
pub enum CronCommands {
    #[command(about = "Call /cron/run once and print the result")]
    Run {
        #[arg(long, help = "Server base URL (defaults to SYNC_SELF_BASE_URL)")]
        url: Option<String>,
    },

    #[command(about = "Call /cron/run on a fixed interval until interrupted")]
    Watch {
        #[arg(long, help = "Server base URL (defaults to SYNC_SELF_BASE_URL)")]
        url: Option<String>,
        #[arg(long, help = "Interval in seconds (defaults to SYNC_INTERVAL_SECS)")]
        every: Option<u64>,
    },
}

fn scheduler(url: Option<String>, every: Option<u64>) -> anyhow::Result<CronScheduler> {
    let config = config::config();
    if config.security.cron_secret.is_empty() {
        anyhow::bail!("CRON_SECRET is not set");
    }
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sync.cron_timeout_secs.max(1)))
        .build()?;
    let base_url = url.unwrap_or_else(|| config.sync.self_base_url.clone());
    let every = Duration::from_secs(every.unwrap_or(config.sync.interval_secs).max(1));
    Ok(CronScheduler::new(http, &base_url, &config.security.cron_secret, every))
}

pub async fn handle(cmd: CronCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        CronCommands::Run { url } => {
            let outcome = scheduler(url, None)?.trigger().await?;
            if outcome.status.is_success() {
                output_success(output_format, &format!("Sync finished ({})", outcome.status), Some(outcome.body))
            } else {
                output_error(output_format, &format!("Sync returned {}: {}", outcome.status, outcome.body), None)?;
                anyhow::bail!("cron run failed with {}", outcome.status)
            }
        }
        CronCommands::Watch { url, every } => {
            let scheduler = scheduler(url, every)?;
            output_success(
                output_format,
                &format!("Triggering sync every {}s, Ctrl-C to stop", scheduler.every().as_secs()),
                None,
            )?;
            tokio::select! {
                _ = scheduler.run() => Ok(()),
                _ = tokio::signal::ctrl_c() => output_success(output_format, "Stopped", None),
            }
        }
    }
}
