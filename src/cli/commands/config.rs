use clap::Subcommand;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config;
use crate::database::DatabaseManager;

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Print the effective configuration (secrets omitted)")]
    Show,
}

pub async fn handle(cmd: ConfigCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let mut value = serde_json::to_value(config::config())?;
            // The database URL may embed credentials
            if let Some(url) = value["database"]["url"].as_str() {
                let redacted = DatabaseManager::redact_url(url).unwrap_or_else(|_| "<invalid>".to_string());
                value["database"]["url"] = serde_json::json!(redacted);
            }
            output_success(output_format, "Effective configuration", Some(value))
        }
    }
}
