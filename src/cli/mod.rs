use clap::{Parser, Subcommand};
use serde_json::json;

use crate::auth::{generate_jwt, Claims};
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Action gateway - authorization and orchestration in front of domain services")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides configuration)")]
        port: Option<u16>,
    },

    #[command(about = "Mint a bearer token signed with the configured secret")]
    Token {
        #[arg(long, help = "Caller id placed in the token subject")]
        user: String,

        #[arg(long = "role", help = "Platform role; repeat for several")]
        roles: Vec<String>,

        #[arg(long, help = "Lifetime in hours (defaults to configuration)")]
        hours: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Serve { port } => crate::app::serve(config, port).await,
        Commands::Token { user, roles, hours } => {
            let token = mint_token(config, &user, roles, hours)?;
            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({"success": true, "token": token}))?);
                }
                OutputFormat::Text => println!("{}", token),
            }
            Ok(())
        }
    }
}

fn mint_token(config: &AppConfig, user: &str, roles: Vec<String>, hours: Option<u64>) -> anyhow::Result<String> {
    if user.is_empty() {
        anyhow::bail!("--user must not be empty");
    }

    let claims = Claims::new(user, roles, hours.unwrap_or(config.security.jwt_expiry_hours));
    Ok(generate_jwt(&claims, &config.security.jwt_secret)?)
}
