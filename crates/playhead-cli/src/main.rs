//! Playhead CLI - Streaming orchestration toolkit
//!
//! Features:
//! - Retry schedule planning
//! - Error message classification
//! - License server smoke testing

use clap::{Parser, Subcommand};
use playhead_core::EngineConfig;
use std::path::PathBuf;

mod commands;
mod output;

use output::OutputFormat;

/// Playhead CLI - Streaming orchestration toolkit
#[derive(Parser)]
#[command(name = "playhead")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Retry planning, error classification and DRM license checks", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the retry delays a policy produces
    RetryPlan {
        /// Retries after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Base delay in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        /// Delay cap in milliseconds
        #[arg(long)]
        max_delay: Option<u64>,

        /// Exponential backoff multiplier
        #[arg(long)]
        multiplier: Option<f64>,

        /// Jitter ratio (0..1)
        #[arg(long)]
        jitter: Option<f64>,
    },

    /// Classify an error message into a retry category
    Classify {
        /// Error message text
        message: String,
    },

    /// POST a key message to a license server
    License {
        /// License server URL
        url: String,

        /// File holding the key message bytes
        #[arg(short, long)]
        message: PathBuf,

        /// Extra request header (Name:Value), repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let format = OutputFormat::from(cli.format.as_str());

    match cli.command {
        Commands::RetryPlan { max_retries, delay, max_delay, multiplier, jitter } => {
            let mut policy = config.retry.clone();
            if let Some(v) = max_retries {
                policy.max_retries = v;
            }
            if let Some(v) = delay {
                policy.retry_delay_ms = v;
            }
            if let Some(v) = max_delay {
                policy.max_retry_delay_ms = v;
            }
            if let Some(v) = multiplier {
                policy.backoff_multiplier = v;
            }
            if let Some(v) = jitter {
                policy.jitter_ratio = v;
            }
            commands::retry_plan(&policy, format)?;
        }
        Commands::Classify { message } => {
            commands::classify(&message, format)?;
        }
        Commands::License { url, message, headers, timeout } => {
            let timeout = timeout
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.license_timeout());
            commands::license(&url, &message, &headers, timeout, format).await?;
        }
    }

    Ok(())
}
