//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values. API keys and other secrets
//! are read from the environment through clap's `env` support.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Energy Insights - daily AI analysis of energy-market news
///
/// Fetches market-moving news and energy quotes, asks an LLM for a market
/// analysis, stores it and delivers it to Telegram subscribers. Upstream
/// failures are contained by circuit breakers and retries; operators are
/// alerted when the system degrades.
///
/// Examples:
///   energy-insights                      # serve /api/cron and /api/health
///   energy-insights --once               # run one analysis and exit
///   energy-insights --send-summary       # send the health digest and exit
///   energy-insights --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for energy-insights.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Address to serve the HTTP endpoints on
    #[arg(long, value_name = "ADDR", env = "ENERGY_INSIGHTS_BIND")]
    pub bind: Option<String>,

    /// Run a single pipeline cycle, print the result and exit
    #[arg(long, conflicts_with = "send_summary")]
    pub once: bool,

    /// Send the daily health summary to the admin chat and exit
    #[arg(long)]
    pub send_summary: bool,

    /// Generate a default energy-insights.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Tavily API key for news search
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,

    /// Groq API key for the analysis model
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase service role key
    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat that receives operator alerts
    #[arg(long, env = "ADMIN_TELEGRAM_CHAT_ID")]
    pub admin_chat_id: Option<String>,

    /// Shared secret required by the trigger endpoints
    #[arg(long, env = "CRON_SECRET", hide_env_values = true)]
    pub cron_secret: Option<String>,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref bind) = self.bind {
            if bind.parse::<SocketAddr>().is_err() {
                return Err(format!(
                    "Bind address must look like 0.0.0.0:3000, got '{}'",
                    bind
                ));
            }
        }

        if let Some(ref url) = self.supabase_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Supabase URL must start with 'http://' or 'https://'".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
