//! Pipeline orchestration.
//!
//! One run fetches news and quotes, asks the analyst for a market analysis,
//! persists the artifacts, delivers the analysis to subscribers and finally
//! lets the health monitor decide whether operators need an alert.
//!
//! Each upstream dependency sits behind its own named circuit breaker.
//! Dependency failures degrade the run (empty inputs, fallback analysis,
//! per-artifact storage failures) but never abort it; only a panic or an
//! exceeded time budget turns into a [`PipelineError`].

mod stages;
mod summary;

pub use stages::{AnalysisStore, Analyst, Broadcaster, MarketSource, NewsSource, Stages};
pub use summary::{AnalysisPreview, RunCounts, RunSummary, StorageOutcome};

use crate::health::HealthMonitor;
use crate::models::{
    Analysis, AnalysisQuality, DeliveryReport, Dependency, DependencyStatus, GradedAnalysis,
    MarketQuote, NewsItem, StoredAnalysis,
};
use crate::resilience::{retry, BreakerRegistry, BreakerSettings, GuardError, RetryPolicy};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use summary::RunRecord;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Failure of the orchestrator itself, as opposed to a dependency.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline run panicked: {0}")]
    Panicked(String),

    #[error("pipeline run exceeded its {}s budget", .0.as_secs())]
    TimedOut(Duration),
}

/// Breaker and retry settings for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub news_breaker: BreakerSettings,
    pub market_breaker: BreakerSettings,
    pub ai_breaker: BreakerSettings,
    pub analysis_retry: RetryPolicy,
    /// Wall-clock budget for a whole run; `None` runs unbounded.
    pub run_budget: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            news_breaker: BreakerSettings::default(),
            market_breaker: BreakerSettings::default(),
            ai_breaker: BreakerSettings::default(),
            analysis_retry: RetryPolicy::new(3, Duration::from_secs(1)),
            run_budget: None,
        }
    }
}

/// The scheduled energy analysis pipeline.
pub struct Pipeline {
    stages: Stages,
    breakers: Arc<BreakerRegistry>,
    monitor: Arc<HealthMonitor>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        stages: Stages,
        breakers: Arc<BreakerRegistry>,
        monitor: Arc<HealthMonitor>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            stages,
            breakers,
            monitor,
            settings,
        }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run one full cycle. Never panics; anything escaping the stage
    /// handling is returned as a [`PipelineError`], after it has been
    /// recorded with the health monitor and alerted on.
    pub async fn execute(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let run = AssertUnwindSafe(self.run()).catch_unwind();

        let outcome = match self.settings.run_budget {
            Some(budget) => match tokio::time::timeout(budget, run).await {
                Ok(outcome) => outcome,
                Err(_) => return self.fail(started, PipelineError::TimedOut(budget)).await,
            },
            None => run.await,
        };

        match outcome {
            Ok(summary) => Ok(summary),
            Err(payload) => {
                self.fail(started, PipelineError::Panicked(panic_message(payload)))
                    .await
            }
        }
    }

    async fn fail(
        &self,
        started: Instant,
        error: PipelineError,
    ) -> Result<RunSummary, PipelineError> {
        self.monitor
            .record_run_failure(started.elapsed(), &error.to_string());
        self.monitor.check_health_and_alert().await;
        Err(error)
    }

    async fn run(&self) -> RunSummary {
        let started = Instant::now();
        info!("Starting energy analysis run");
        self.monitor.start_run();

        let news = self
            .fetch_stage(Dependency::News, self.settings.news_breaker, || {
                self.stages.news.fetch_news()
            })
            .await;
        info!("Found {} relevant news articles", news.len());

        let quotes = self
            .fetch_stage(Dependency::Market, self.settings.market_breaker, || {
                self.stages.market.fetch_quotes()
            })
            .await;
        info!("Retrieved data for {} market symbols", quotes.len());

        let graded = self.analyze(&news, &quotes).await;

        let (stored, storage) = self.persist(&graded.analysis, &news, &quotes).await;
        let stored = stored.unwrap_or_else(|| {
            let temporary = StoredAnalysis::temporary(graded.analysis.clone());
            warn!("Using temporary analysis identity {}", temporary.id);
            temporary
        });

        let delivery = self.deliver(&stored).await;

        let elapsed = started.elapsed();
        self.monitor.record_execution_time(elapsed);
        self.monitor.check_health_and_alert().await;

        info!("Analysis run completed in {}ms", elapsed.as_millis());

        RunSummary::from_record(RunRecord {
            news_articles: news.len(),
            market_symbols: quotes.len(),
            graded: &graded,
            stored: &stored,
            storage,
            delivery,
            elapsed,
        })
    }

    /// Run a fetch stage behind its breaker; a failure yields an empty list.
    async fn fetch_stage<T, F, Fut>(
        &self,
        dependency: Dependency,
        settings: BreakerSettings,
        op: F,
    ) -> Vec<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let breaker = self.breakers.breaker(dependency.breaker_name(), settings);

        match breaker.call(op).await {
            Ok(items) => {
                self.monitor
                    .record_dependency_status(dependency, DependencyStatus::Healthy);
                items
            }
            Err(e) => {
                warn!("{} stage failed, continuing without it: {:#}", dependency, e);
                self.monitor
                    .record_dependency_status(dependency, DependencyStatus::Failed);
                Vec::new()
            }
        }
    }

    async fn analyze(&self, news: &[NewsItem], quotes: &[MarketQuote]) -> GradedAnalysis {
        let breaker = self
            .breakers
            .breaker(Dependency::Ai.breaker_name(), self.settings.ai_breaker);
        let policy = self.settings.analysis_retry;
        let analyst = &self.stages.analyst;

        let outcome = breaker
            .call(|| retry(&policy, "AI analysis", || analyst.analyze(news, quotes)))
            .await;

        match outcome {
            Ok(graded) => {
                info!("AI analysis completed ({} quality)", graded.quality);
                self.monitor
                    .record_dependency_status(Dependency::Ai, DependencyStatus::Healthy);
                self.monitor
                    .record_analysis_quality(graded.quality, graded.note.as_deref());
                graded
            }
            Err(e) => {
                error!("AI analysis unavailable, using fallback: {:#}", e);
                let cause = fallback_cause(&e);
                self.monitor
                    .record_dependency_status(Dependency::Ai, DependencyStatus::Failed);
                self.monitor.record_analysis_quality(
                    AnalysisQuality::Fallback,
                    Some(&format!("complete failure: {}", cause)),
                );
                GradedAnalysis {
                    analysis: Analysis::fallback(&cause),
                    quality: AnalysisQuality::Fallback,
                    note: Some(cause),
                }
            }
        }
    }

    async fn persist(
        &self,
        analysis: &Analysis,
        news: &[NewsItem],
        quotes: &[MarketQuote],
    ) -> (Option<StoredAnalysis>, StorageOutcome) {
        let store = &self.stages.store;
        let (analysis_result, news_result, market_result) = tokio::join!(
            store.store_analysis(analysis),
            store.store_news(news),
            store.store_quotes(quotes),
        );

        let stored = match analysis_result {
            Ok(stored) => {
                info!("Analysis stored as {}", stored.id);
                Some(stored)
            }
            Err(e) => {
                error!("Failed to store analysis: {:#}", e);
                None
            }
        };

        let news_ok = log_store_result("news articles", news_result);
        let market_ok = log_store_result("market data", market_result);

        let outcome = StorageOutcome {
            analysis: stored.is_some(),
            news: news_ok,
            market: market_ok,
        };
        (stored, outcome)
    }

    async fn deliver(&self, analysis: &StoredAnalysis) -> DeliveryReport {
        match self.stages.broadcaster.deliver(analysis).await {
            Ok(report) => {
                info!(
                    "Insights delivered to {}/{} subscribers",
                    report.delivered, report.subscribers
                );
                self.monitor
                    .record_delivery(report.subscribers, report.delivered);
                report
            }
            Err(e) => {
                self.monitor.record_delivery_failure(&format!("{:#}", e));
                DeliveryReport::default()
            }
        }
    }
}

fn log_store_result(what: &str, result: anyhow::Result<usize>) -> bool {
    match result {
        Ok(rows) => {
            info!("Stored {} {}", rows, what);
            true
        }
        Err(e) => {
            error!("Failed to store {}: {:#}", what, e);
            false
        }
    }
}

fn fallback_cause(error: &GuardError) -> String {
    match error {
        GuardError::CircuitOpen { retry_after, .. } => format!(
            "AI service paused after repeated failures, retrying in {}s",
            retry_after.as_secs()
        ),
        GuardError::Exhausted { attempts, source } => {
            format!("AI service failed after {} attempts: {}", attempts, source)
        }
        GuardError::Failed(source) => format!("AI service failed: {}", source),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests;
