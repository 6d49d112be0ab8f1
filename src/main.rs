//! chat-relay - streaming chat relay with ordered model fallback
//!
//! A small HTTP service that forwards chat messages to an upstream
//! text-generation API, falling back across candidate models and returning
//! either a single reply or a plain-text token stream.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::config::{Config, KeySource};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Streaming chat relay with ordered model fallback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file (defaults come from the environment)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration
    Check {
        /// Path to configuration file (defaults come from the environment)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(Config, KeySource)> {
    let loaded = match path {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env()?,
    };
    Ok(loaded)
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("chat_relay={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut config, key_source) = load_config(config.as_ref())?;
            init_tracing(&config.logging.level);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            match &key_source {
                KeySource::None => {
                    tracing::warn!("No upstream API key configured; chat requests will fail")
                }
                source => tracing::info!(key_source = %source, "Upstream API key resolved"),
            }
            tracing::info!(
                upstream = %config.upstream.url,
                shape = ?config.upstream.shape,
                models = ?config.models.default,
                "Loaded configuration"
            );

            chat_relay::proxy::run_server(config).await
        }

        Commands::Check { config } => {
            let path = config
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<environment>".to_string());

            match load_config(config.as_ref()) {
                Ok((config, key_source)) => {
                    println!("Configuration OK: {}", path);
                    println!("  listen:     {}", config.server.listen);
                    println!("  upstream:   {} ({:?})", config.upstream.url, config.upstream.shape);
                    println!("  api key:    {}", key_source);
                    println!("  models:     {}", config.models.default.join(", "));
                    println!(
                        "  fallback:   not_found={} server_error={}",
                        config.models.retry_on_not_found, config.models.retry_on_server_error
                    );
                    if key_source == KeySource::None {
                        println!("Warning: no API key; set upstream.api_key or OPENAI_API_KEY");
                    }
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Configuration invalid: {}", path);
                    Err(e)
                }
            }
        }
    }
}
