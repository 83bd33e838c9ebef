//! genrelay - streaming relay for generative text providers
//!
//! Accepts prompts over HTTP, forwards them to the configured provider, and
//! relays the generated text back as a normalized SSE stream.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genrelay::config::{Config, KeySource};

#[derive(Parser)]
#[command(name = "genrelay")]
#[command(about = "Streaming relay for generative text providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("genrelay={level},tower_http={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn report_key_source(config: &Config, key_source: &KeySource) {
    match key_source {
        KeySource::None => tracing::warn!(
            provider = %config.provider.name,
            "No API key configured - relay requests will fail with MissingCredential"
        ),
        source => tracing::info!(
            provider = %config.provider.name,
            key_source = %source,
            "Provider API key resolved"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_source) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);
            tracing::info!(config = %config, "Loaded configuration");
            report_key_source(&cfg, &key_source);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            genrelay::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, key_source) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);
            report_key_source(&cfg, &key_source);

            println!("Configuration OK: {}", config);
            println!("  listen:        {}", cfg.server.listen);
            println!("  provider:      {} ({})", cfg.provider.name, cfg.provider.url);
            println!("  default model: {}", cfg.provider.default_model);
            println!("  api key:       {}", key_source);
            println!(
                "  rate limit:    {} requests / {}s",
                cfg.rate_limit.max_requests, cfg.rate_limit.window_secs
            );
            println!("  heartbeat:     {}s", cfg.stream.heartbeat_secs);
            Ok(())
        }
    }
}
