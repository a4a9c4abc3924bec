//! Energy Insights - daily energy-market briefing service
//!
//! Collects energy news and market quotes, asks a language model for a
//! probabilistic outlook, stores the result and delivers it to Telegram
//! subscribers. Every upstream sits behind a circuit breaker and the run
//! health is watched and reported to an admin chat.
//!
//! Modes:
//!   (default)       - serve the HTTP trigger and health endpoints
//!   --once          - run the pipeline once and print the run summary
//!   --send-summary  - send the daily health summary and exit
//!
//! Exit codes:
//!   0 - Success
//!   1 - Configuration error or failed pipeline run

mod cli;
mod clients;
mod config;
mod health;
mod models;
mod pipeline;
mod resilience;
mod server;

use anyhow::{Context, Result};
use cli::Args;
use clients::{
    build_http_client, GroqAnalyst, SupabaseStore, TavilyNews, TelegramBot, TelegramBroadcaster,
    TelegramNotifier, YahooMarket,
};
use config::{Config, DEFAULT_CONFIG_FILE};
use health::{HealthMonitor, LogNotifier, Notifier};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::{Pipeline, Stages};
use resilience::BreakerRegistry;
use server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Energy Insights v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: write a default configuration file.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Secrets are best supplied through environment variables.");
    Ok(())
}

/// `RUST_LOG` wins over the verbosity flags when set.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(args.log_level().into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let pipeline = Arc::new(build_pipeline(&config)?);

    if args.once {
        return run_once(&pipeline).await;
    }

    if args.send_summary {
        pipeline.monitor().send_daily_summary().await;
        println!("✅ Health summary sent.");
        return Ok(0);
    }

    if config.schedule.enabled {
        spawn_scheduler(pipeline.clone(), &config);
    }

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind))?;
    if config.server.trigger_secret.is_none() {
        warn!("No trigger secret configured; every trigger request will be rejected");
    }

    let state = Arc::new(AppState::new(pipeline, config.server.trigger_secret.clone()));
    server::serve(state, addr).await?;
    Ok(0)
}

/// Wire the production collaborators into a pipeline.
fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let http = build_http_client(config.request_timeout())?;

    let news = TavilyNews::new(http.clone(), config.news.clone(), config.resilience.news_retry)?;
    let market = YahooMarket::new(http.clone(), config.market.clone());
    let analyst = GroqAnalyst::new(http.clone(), config.model.clone())?;
    let store = Arc::new(SupabaseStore::new(http.clone(), &config.storage)?);
    let bot = Arc::new(TelegramBot::new(http, &config.telegram)?);

    let notifier: Arc<dyn Notifier> = match config.telegram.admin_chat_id.as_deref() {
        Some(chat_id) => Arc::new(TelegramNotifier::new(bot.clone(), chat_id)),
        None => {
            warn!("No admin chat configured; alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let stages = Stages {
        news: Arc::new(news),
        market: Arc::new(market),
        analyst: Arc::new(analyst),
        store: store.clone(),
        broadcaster: Arc::new(TelegramBroadcaster::new(bot, store)),
    };

    let monitor = Arc::new(HealthMonitor::new(notifier, config.health_thresholds()));

    Ok(Pipeline::new(
        stages,
        BreakerRegistry::new(),
        monitor,
        config.pipeline_settings(),
    ))
}

/// Handle --once: one run, summary printed as JSON.
async fn run_once(pipeline: &Pipeline) -> Result<i32> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Running energy analysis...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = pipeline.execute().await;
    spinner.finish_and_clear();

    match outcome {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            println!(
                "\n✅ Analysis {} delivered to {}/{} subscribers in {}ms",
                summary.analysis_id,
                summary.summary.delivery.delivered,
                summary.summary.delivery.subscribers,
                summary.execution_time_ms
            );
            Ok(0)
        }
        Err(e) => {
            eprintln!("\n⛔ Pipeline run failed: {}", e);
            Ok(1)
        }
    }
}

/// Run the pipeline every `interval_hours`, optionally followed by the
/// daily health summary.
fn spawn_scheduler(pipeline: Arc<Pipeline>, config: &Config) {
    let period = Duration::from_secs(config.schedule.interval_hours.max(1) * 3600);
    let daily_summary = config.schedule.daily_summary;
    info!("Scheduling a run every {}h", period.as_secs() / 3600);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match pipeline.execute().await {
                Ok(summary) => info!(
                    "Scheduled run finished: analysis {} in {}ms",
                    summary.analysis_id, summary.execution_time_ms
                ),
                Err(e) => error!("Scheduled run failed: {}", e),
            }
            if daily_summary {
                pipeline.monitor().send_daily_summary().await;
            }
        }
    });
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
