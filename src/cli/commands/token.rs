use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Issue a session token for a user id (development only)")]
    Mint {
        #[arg(help = "User id the token is issued for")]
        user_id: Uuid,
        #[arg(long, help = "Email claim")]
        email: Option<String>,
        #[arg(long, help = "Lifetime in hours (defaults to SECURITY_JWT_EXPIRY_HOURS)")]
        hours: Option<u64>,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Mint { user_id, email, hours } => {
            if !crate::is_development!() {
                anyhow::bail!("token mint is only available in development");
            }
            let security = &config::config().security;
            let claims = Claims::new(user_id, email, hours.unwrap_or(security.jwt_expiry_hours));
            let token = generate_jwt(&claims, &security.jwt_secret)?;
            output_success(
                output_format,
                &format!("Session token for {}", user_id),
                Some(json!({ "token": token, "expiresAt": claims.exp })),
            )
        }
    }
}
