//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `energy-insights.toml` files. Secrets are normally supplied through
//! environment variables and merged in from the CLI arguments.

use crate::health::HealthThresholds;
use crate::pipeline::PipelineSettings;
use crate::resilience::{BreakerSettings, RetryPolicy};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "energy-insights.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Circuit breaker and retry settings.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Health monitoring thresholds.
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// News search settings.
    #[serde(default)]
    pub news: NewsConfig,

    /// Market quote settings.
    #[serde(default)]
    pub market: MarketConfig,

    /// Analysis model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telegram settings.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// In-process schedule.
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the trigger and health endpoints listen on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared secret expected by the trigger endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_secret: Option<String>,

    /// Wall-clock budget for a pipeline run in seconds (0 disables it).
    #[serde(default = "default_run_budget")]
    pub run_budget_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            trigger_secret: None,
            run_budget_secs: default_run_budget(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

/// The slow-run thresholds default to 75% and 83% of this budget.
fn default_run_budget() -> u64 {
    60
}

/// Circuit breaker and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Timeout applied to every outbound HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub news_breaker: BreakerSettings,

    #[serde(default)]
    pub market_breaker: BreakerSettings,

    #[serde(default)]
    pub ai_breaker: BreakerSettings,

    /// Retry around the whole analysis call.
    #[serde(default)]
    pub analysis_retry: RetryPolicy,

    /// Retry around each individual news query.
    #[serde(default = "default_news_retry")]
    pub news_retry: RetryPolicy,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            news_breaker: BreakerSettings::default(),
            market_breaker: BreakerSettings::default(),
            ai_breaker: BreakerSettings::default(),
            analysis_retry: RetryPolicy::default(),
            news_retry: default_news_retry(),
        }
    }
}

fn default_request_timeout() -> u64 {
    45
}

fn default_news_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(2))
}

/// Health monitoring thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Runs at least this slow are logged as a warning.
    #[serde(default = "default_slow_warning")]
    pub slow_warning_ms: u64,

    /// Runs slower than this raise an operator alert.
    #[serde(default = "default_slow_alert")]
    pub slow_alert_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            slow_warning_ms: default_slow_warning(),
            slow_alert_ms: default_slow_alert(),
        }
    }
}

fn default_slow_warning() -> u64 {
    45_000
}

fn default_slow_alert() -> u64 {
    50_000
}

/// News search (Tavily) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(default = "default_news_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Market-moving queries, searched concurrently.
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,

    /// Results requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,

    /// Articles kept after ranking.
    #[serde(default = "default_keep_top")]
    pub keep_top: usize,

    #[serde(default = "default_include_domains")]
    pub include_domains: Vec<String>,

    #[serde(default = "default_exclude_domains")]
    pub exclude_domains: Vec<String>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_url: default_news_url(),
            api_key: None,
            queries: default_queries(),
            results_per_query: default_results_per_query(),
            keep_top: default_keep_top(),
            include_domains: default_include_domains(),
            exclude_domains: default_exclude_domains(),
        }
    }
}

fn default_news_url() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_queries() -> Vec<String> {
    vec![
        "OPEC production cuts oil prices",
        "Federal Reserve interest rates energy sector",
        "energy infrastructure pipeline refinery",
        "oil gas inventory report EIA",
        "energy company earnings results",
        "renewable energy policy government",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_results_per_query() -> usize {
    10
}

fn default_keep_top() -> usize {
    15
}

fn default_include_domains() -> Vec<String> {
    vec![
        "bloomberg.com",
        "reuters.com",
        "wsj.com",
        "ft.com",
        "cnbc.com",
        "marketwatch.com",
        "oilprice.com",
        "energyvoice.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_exclude_domains() -> Vec<String> {
    vec!["reddit.com", "twitter.com", "facebook.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Market quote settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_quote_url")]
    pub quote_url: String,

    /// Futures, ETFs, majors, renewables and pipelines.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            quote_url: default_quote_url(),
            symbols: default_symbols(),
        }
    }
}

fn default_quote_url() -> String {
    "https://query1.finance.yahoo.com/v7/finance/quote".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "CL=F", "BZ=F", "NG=F", "HO=F", "RB=F", "XLE", "OIH", "ENFR", "XOM", "CVX", "COP", "SHEL",
        "BP", "TTE", "NEE", "FSLR", "ENPH", "TSLA", "KMI", "EPD", "ENB",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Analysis model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_model_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Summary points requested from the model.
    #[serde(default = "default_summary_points")]
    pub summary_points: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            api_url: default_model_url(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            summary_points: default_summary_points(),
        }
    }
}

fn default_model() -> String {
    "mixtral-8x7b-32768".to_string()
}

fn default_model_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2500
}

fn default_summary_points() -> usize {
    5
}

/// Supabase (PostgREST) settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Service role key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
}

/// Telegram settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Chat that receives operator alerts and the daily summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_chat_id: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: default_telegram_url(),
            bot_token: None,
            admin_chat_id: None,
        }
    }
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

/// In-process schedule, used when no external scheduler calls the trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Send the health digest after each scheduled run.
    #[serde(default = "default_true")]
    pub daily_summary: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_interval_hours(),
            daily_summary: true,
        }
    }
}

fn default_interval_hours() -> u64 {
    24
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the CLI (or its environment variables) actually provides
    /// override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref bind) = args.bind {
            self.server.bind = bind.clone();
        }

        override_secret(&mut self.server.trigger_secret, &args.cron_secret);
        override_secret(&mut self.news.api_key, &args.tavily_api_key);
        override_secret(&mut self.model.api_key, &args.groq_api_key);
        override_secret(&mut self.storage.url, &args.supabase_url);
        override_secret(&mut self.storage.service_key, &args.supabase_key);
        override_secret(&mut self.telegram.bot_token, &args.telegram_bot_token);
        override_secret(&mut self.telegram.admin_chat_id, &args.admin_chat_id);
    }

    /// Check that the slow-run thresholds sit below the run budget, so the
    /// slow alert fires before a run is cut off.
    pub fn validate(&self) -> Result<()> {
        let monitoring = &self.monitoring;
        if monitoring.slow_warning_ms >= monitoring.slow_alert_ms {
            bail!(
                "monitoring.slow_warning_ms ({}) must be below monitoring.slow_alert_ms ({})",
                monitoring.slow_warning_ms,
                monitoring.slow_alert_ms
            );
        }

        let budget_ms = self.server.run_budget_secs.saturating_mul(1000);
        if budget_ms > 0 && monitoring.slow_alert_ms >= budget_ms {
            bail!(
                "monitoring.slow_alert_ms ({}) must be below server.run_budget_secs ({}s)",
                monitoring.slow_alert_ms,
                self.server.run_budget_secs
            );
        }
        Ok(())
    }

    /// Breaker, retry and budget settings for the pipeline.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let budget = self.server.run_budget_secs;

        PipelineSettings {
            news_breaker: self.resilience.news_breaker,
            market_breaker: self.resilience.market_breaker,
            ai_breaker: self.resilience.ai_breaker,
            analysis_retry: self.resilience.analysis_retry,
            run_budget: (budget > 0).then(|| Duration::from_secs(budget)),
        }
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            slow_warning: Duration::from_millis(self.monitoring.slow_warning_ms),
            slow_alert: Duration::from_millis(self.monitoring.slow_alert_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.resilience.request_timeout_secs)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

fn override_secret(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *target = Some(value.to_string());
    }
}
