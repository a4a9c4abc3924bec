use super::*;
use crate::health::tests::RecordingNotifier;
use crate::health::{AlertSeverity, HealthThresholds};
use crate::models::{Direction, Prediction, Predictions, SummaryPoint};
use crate::resilience::CircuitState;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub(crate) fn news_item(url: &str) -> NewsItem {
    NewsItem {
        title: format!("Headline for {}", url),
        url: url.to_string(),
        content: "OPEC+ signals deeper cuts".to_string(),
        published_at: Utc::now(),
        score: 0.8,
    }
}

pub(crate) fn quote(symbol: &str) -> MarketQuote {
    MarketQuote {
        symbol: symbol.to_string(),
        price: 73.45,
        change: 0.9,
        change_percent: 1.2,
        timestamp: Utc::now(),
    }
}

pub(crate) fn sample_analysis() -> Analysis {
    let up = Prediction {
        direction: Direction::Up,
        confidence: 70,
        reasoning: "Inventories drawing down".to_string(),
    };
    Analysis {
        summary: vec![SummaryPoint {
            text: "Crude rallies on supply cuts".to_string(),
            source_url: "https://example.com/crude".to_string(),
        }],
        predictions: Predictions {
            crude_oil: up.clone(),
            natural_gas: up.clone(),
            energy_stocks: up.clone(),
            utilities: up,
        },
        reasoning: "Supply discipline keeps prices supported.".to_string(),
        accuracy_score: None,
    }
}

pub(crate) struct FixedNews(pub Vec<NewsItem>);

#[async_trait]
impl NewsSource for FixedNews {
    async fn fetch_news(&self) -> anyhow::Result<Vec<NewsItem>> {
        Ok(self.0.clone())
    }
}

pub(crate) struct FailingNews;

#[async_trait]
impl NewsSource for FailingNews {
    async fn fetch_news(&self) -> anyhow::Result<Vec<NewsItem>> {
        anyhow::bail!("tavily returned 429")
    }
}

pub(crate) struct FixedMarket(pub Vec<MarketQuote>);

#[async_trait]
impl MarketSource for FixedMarket {
    async fn fetch_quotes(&self) -> anyhow::Result<Vec<MarketQuote>> {
        Ok(self.0.clone())
    }
}

pub(crate) struct FailingMarket;

#[async_trait]
impl MarketSource for FailingMarket {
    async fn fetch_quotes(&self) -> anyhow::Result<Vec<MarketQuote>> {
        anyhow::bail!("quote endpoint unreachable")
    }
}

/// Analyst that fails its first `failures` calls, then answers.
pub(crate) struct ScriptedAnalyst {
    pub failures: u32,
    pub quality: AnalysisQuality,
    pub calls: AtomicU32,
    pub seen_inputs: Mutex<Vec<(usize, usize)>>,
}

impl ScriptedAnalyst {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            quality: AnalysisQuality::Full,
            calls: AtomicU32::new(0),
            seen_inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyst for ScriptedAnalyst {
    async fn analyze(
        &self,
        news: &[NewsItem],
        quotes: &[MarketQuote],
    ) -> anyhow::Result<GradedAnalysis> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_inputs
            .lock()
            .unwrap()
            .push((news.len(), quotes.len()));

        if call <= self.failures {
            anyhow::bail!("model overloaded");
        }
        Ok(GradedAnalysis {
            analysis: sample_analysis(),
            quality: self.quality,
            note: None,
        })
    }
}

/// In-memory store; individual artifacts can be made to fail.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub fail_analysis: bool,
    pub fail_news: bool,
    pub fail_quotes: bool,
    pub stored: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn store_analysis(&self, analysis: &Analysis) -> anyhow::Result<StoredAnalysis> {
        if self.fail_analysis {
            anyhow::bail!("insert into analysis_results failed");
        }
        self.stored.lock().unwrap().push("analysis");
        Ok(StoredAnalysis {
            id: "analysis-1".to_string(),
            created_at: Utc::now(),
            analysis: analysis.clone(),
        })
    }

    async fn store_news(&self, news: &[NewsItem]) -> anyhow::Result<usize> {
        if self.fail_news {
            anyhow::bail!("insert into news_articles failed");
        }
        self.stored.lock().unwrap().push("news");
        Ok(news.len())
    }

    async fn store_quotes(&self, quotes: &[MarketQuote]) -> anyhow::Result<usize> {
        if self.fail_quotes {
            anyhow::bail!("insert into market_data failed");
        }
        self.stored.lock().unwrap().push("market");
        Ok(quotes.len())
    }
}

/// Broadcaster that records delivered analysis ids.
pub(crate) struct RecordingBroadcaster {
    pub subscribers: usize,
    pub unreachable: bool,
    pub delivered: Mutex<Vec<StoredAnalysis>>,
}

impl RecordingBroadcaster {
    pub fn new(subscribers: usize) -> Self {
        Self {
            subscribers,
            unreachable: false,
            delivered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn deliver(&self, analysis: &StoredAnalysis) -> anyhow::Result<DeliveryReport> {
        if self.unreachable {
            anyhow::bail!("telegram API unreachable");
        }
        self.delivered.lock().unwrap().push(analysis.clone());
        Ok(DeliveryReport {
            subscribers: self.subscribers,
            delivered: self.subscribers,
        })
    }
}

struct PanickingBroadcaster;

#[async_trait]
impl Broadcaster for PanickingBroadcaster {
    async fn deliver(&self, _analysis: &StoredAnalysis) -> anyhow::Result<DeliveryReport> {
        panic!("subscriber list corrupted")
    }
}

pub(crate) struct StalledNews;

#[async_trait]
impl NewsSource for StalledNews {
    async fn fetch_news(&self) -> anyhow::Result<Vec<NewsItem>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

pub(crate) struct Harness {
    pub analyst: Arc<ScriptedAnalyst>,
    pub store: Arc<MemoryStore>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Arc<Pipeline>,
}

pub(crate) struct HarnessBuilder {
    pub news: Arc<dyn NewsSource>,
    pub market: Arc<dyn MarketSource>,
    pub analyst: ScriptedAnalyst,
    pub store: MemoryStore,
    pub broadcaster: RecordingBroadcaster,
    pub settings: PipelineSettings,
    pub breakers: Arc<BreakerRegistry>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            news: Arc::new(FixedNews(vec![news_item("https://a"), news_item("https://b")])),
            market: Arc::new(FixedMarket(vec![quote("CL=F"), quote("NG=F"), quote("XLE")])),
            analyst: ScriptedAnalyst::new(0),
            store: MemoryStore::default(),
            broadcaster: RecordingBroadcaster::new(2),
            settings: PipelineSettings::default(),
            breakers: BreakerRegistry::new(),
        }
    }
}

impl HarnessBuilder {
    pub fn build(self) -> Harness {
        let analyst = Arc::new(self.analyst);
        let store = Arc::new(self.store);
        let broadcaster = Arc::new(self.broadcaster);
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = Arc::new(HealthMonitor::new(
            notifier.clone(),
            HealthThresholds::default(),
        ));

        let stages = Stages {
            news: self.news,
            market: self.market,
            analyst: analyst.clone(),
            store: store.clone(),
            broadcaster: broadcaster.clone(),
        };

        Harness {
            analyst,
            store,
            broadcaster,
            notifier,
            pipeline: Arc::new(Pipeline::new(stages, self.breakers, monitor, self.settings)),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_healthy_run() {
    let harness = HarnessBuilder::default().build();

    let summary = harness.pipeline.execute().await.unwrap();

    assert_eq!(summary.analysis_id, "analysis-1");
    assert_eq!(summary.summary.news_articles, 2);
    assert_eq!(summary.summary.market_symbols, 3);
    assert_eq!(summary.summary.predictions_generated, 4);
    assert_eq!(summary.summary.analysis_quality, AnalysisQuality::Full);
    assert_eq!(summary.summary.delivery.delivered, 2);
    assert_eq!(harness.analyst.calls(), 1);
    assert!(harness.notifier.sent().is_empty());

    let health = harness.pipeline.monitor().get_health();
    assert_eq!(health.overall_status(), crate::health::OverallStatus::Healthy);
    assert_eq!((health.subscriber_count, health.messages_sent), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_failed_sources_still_produce_analysis() {
    let harness = HarnessBuilder {
        news: Arc::new(FailingNews),
        market: Arc::new(FailingMarket),
        ..HarnessBuilder::default()
    }
    .build();

    let summary = harness.pipeline.execute().await.unwrap();

    assert_eq!(summary.summary.news_articles, 0);
    assert_eq!(summary.summary.market_symbols, 0);
    assert_eq!(summary.analysis.predictions.len(), 4);
    assert_eq!(*harness.analyst.seen_inputs.lock().unwrap(), vec![(0, 0)]);

    let health = harness.pipeline.monitor().get_health();
    assert_eq!(health.news_api_status, DependencyStatus::Failed);
    assert_eq!(health.market_api_status, DependencyStatus::Failed);
    assert_eq!(health.ai_api_status, DependencyStatus::Healthy);

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("News API is down"));
    assert!(sent[0].contains("Market API is down"));
}

#[tokio::test(start_paused = true)]
async fn test_analysis_failure_falls_back_to_neutral() {
    let harness = HarnessBuilder {
        analyst: ScriptedAnalyst::always_failing(),
        ..HarnessBuilder::default()
    }
    .build();

    let started = Instant::now();
    let summary = harness.pipeline.execute().await.unwrap();

    assert_eq!(harness.analyst.calls(), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    assert_eq!(summary.summary.analysis_quality, AnalysisQuality::Fallback);
    for (_, prediction) in summary.analysis.predictions.iter() {
        assert_eq!(prediction.direction, Direction::Sideways);
    }
    assert!(!summary.analysis.reasoning.is_empty());

    let delivered = harness.broadcaster.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].analysis.reasoning.contains("failed after 3 attempts"));

    let health = harness.pipeline.monitor().get_health();
    assert_eq!(health.ai_api_status, DependencyStatus::Failed);
    assert_eq!(health.analysis_quality, AnalysisQuality::Fallback);
    assert_eq!(
        harness.pipeline.monitor().evaluate().unwrap().severity,
        AlertSeverity::Error
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_analysis_failure_is_retried() {
    let harness = HarnessBuilder {
        analyst: ScriptedAnalyst::new(2),
        ..HarnessBuilder::default()
    }
    .build();

    let summary = harness.pipeline.execute().await.unwrap();

    assert_eq!(harness.analyst.calls(), 3);
    assert_eq!(summary.summary.analysis_quality, AnalysisQuality::Full);
    assert_eq!(
        harness
            .pipeline
            .breakers()
            .breaker("ai-analysis", BreakerSettings::default())
            .consecutive_failures(),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_partial_grade_is_recorded() {
    let mut analyst = ScriptedAnalyst::new(0);
    analyst.quality = AnalysisQuality::Partial;
    let harness = HarnessBuilder {
        analyst,
        ..HarnessBuilder::default()
    }
    .build();

    let summary = harness.pipeline.execute().await.unwrap();

    assert_eq!(summary.summary.analysis_quality, AnalysisQuality::Partial);
    assert_eq!(
        harness.pipeline.monitor().get_health().analysis_quality,
        AnalysisQuality::Partial
    );
    assert!(harness.notifier.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_storage_failure_is_isolated() {
    let harness = HarnessBuilder {
        store: MemoryStore {
            fail_news: true,
            ..MemoryStore::default()
        },
        ..HarnessBuilder::default()
    }
    .build();

    let summary = harness.pipeline.execute().await.unwrap();

    let mut stored = harness.store.stored.lock().unwrap().clone();
    stored.sort();
    assert_eq!(stored, vec!["analysis", "market"]);
    assert_eq!(
        summary.summary.storage,
        StorageOutcome {
            analysis: true,
            news: false,
            market: true
        }
    );
    assert_eq!(harness.broadcaster.delivered.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unstored_analysis_gets_temporary_identity() {
    let harness = HarnessBuilder {
        store: MemoryStore {
            fail_analysis: true,
            ..MemoryStore::default()
        },
        ..HarnessBuilder::default()
    }
    .build();

    let summary = harness.pipeline.execute().await.unwrap();

    assert!(summary.analysis_id.starts_with("temp-"));
    let delivered = harness.broadcaster.delivered.lock().unwrap();
    assert_eq!(delivered[0].id, summary.analysis_id);
    assert_eq!(delivered[0].analysis, sample_analysis());
}

#[tokio::test(start_paused = true)]
async fn test_delivery_outage_does_not_fail_run() {
    let mut broadcaster = RecordingBroadcaster::new(5);
    broadcaster.unreachable = true;
    let harness = HarnessBuilder {
        broadcaster,
        ..HarnessBuilder::default()
    }
    .build();

    let summary = harness.pipeline.execute().await.unwrap();

    assert_eq!(summary.summary.delivery, DeliveryReport::default());
    let health = harness.pipeline.monitor().get_health();
    assert!(health.delivery_failed);

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("🚨"));
    assert!(sent[0].contains("Delivery channel unreachable"));
}

#[tokio::test(start_paused = true)]
async fn test_delivery_recovery_clears_outage() {
    let mut broadcaster = RecordingBroadcaster::new(5);
    broadcaster.unreachable = true;
    let harness = HarnessBuilder {
        broadcaster,
        ..HarnessBuilder::default()
    }
    .build();
    harness.pipeline.execute().await.unwrap();

    harness.pipeline.monitor().start_run();
    harness.pipeline.monitor().record_delivery(5, 5);

    let health = harness.pipeline.monitor().get_health();
    assert!(!health.delivery_failed);
    assert!(harness.pipeline.monitor().evaluate().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_skips_analyst_on_next_run() {
    let settings = PipelineSettings {
        ai_breaker: BreakerSettings {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(600),
        },
        analysis_retry: RetryPolicy::new(2, Duration::from_millis(10)),
        ..PipelineSettings::default()
    };
    let harness = HarnessBuilder {
        analyst: ScriptedAnalyst::always_failing(),
        settings,
        ..HarnessBuilder::default()
    }
    .build();

    harness.pipeline.execute().await.unwrap();
    assert_eq!(harness.analyst.calls(), 2);

    let second = harness.pipeline.execute().await.unwrap();
    assert_eq!(harness.analyst.calls(), 2);
    assert_eq!(second.summary.analysis_quality, AnalysisQuality::Fallback);
    assert!(second.analysis.reasoning.contains("paused after repeated failures"));

    let ai = harness
        .pipeline
        .breakers()
        .breaker("ai-analysis", settings.ai_breaker);
    assert_eq!(ai.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_shared_registry_spans_pipelines() {
    let breakers = BreakerRegistry::new();
    let settings = PipelineSettings {
        news_breaker: BreakerSettings {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        },
        ..PipelineSettings::default()
    };

    let first = HarnessBuilder {
        news: Arc::new(FailingNews),
        breakers: breakers.clone(),
        settings,
        ..HarnessBuilder::default()
    }
    .build();
    first.pipeline.execute().await.unwrap();

    let second = HarnessBuilder {
        breakers: breakers.clone(),
        settings,
        ..HarnessBuilder::default()
    }
    .build();
    let summary = second.pipeline.execute().await.unwrap();

    assert_eq!(summary.summary.news_articles, 0);
    assert_eq!(
        second.pipeline.monitor().get_health().news_api_status,
        DependencyStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn test_panic_becomes_pipeline_error() {
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = Arc::new(HealthMonitor::new(
        notifier.clone(),
        HealthThresholds::default(),
    ));
    let stages = Stages {
        news: Arc::new(FixedNews(Vec::new())),
        market: Arc::new(FixedMarket(Vec::new())),
        analyst: Arc::new(ScriptedAnalyst::new(0)),
        store: Arc::new(MemoryStore::default()),
        broadcaster: Arc::new(PanickingBroadcaster),
    };
    let pipeline = Pipeline::new(
        stages,
        BreakerRegistry::new(),
        monitor,
        PipelineSettings::default(),
    );

    match pipeline.execute().await {
        Err(PipelineError::Panicked(message)) => {
            assert_eq!(message, "subscriber list corrupted")
        }
        other => panic!("expected panic to be caught, got {other:?}"),
    }

    let health = pipeline.monitor().get_health();
    assert_eq!(
        health.run_error.as_deref(),
        Some("pipeline run panicked: subscriber list corrupted")
    );
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Pipeline run failed: pipeline run panicked"));
}

#[tokio::test(start_paused = true)]
async fn test_run_budget_is_enforced() {
    let harness = HarnessBuilder {
        news: Arc::new(StalledNews),
        settings: PipelineSettings {
            run_budget: Some(Duration::from_secs(60)),
            ..PipelineSettings::default()
        },
        ..HarnessBuilder::default()
    }
    .build();

    let result = harness.pipeline.execute().await;

    assert!(matches!(result, Err(PipelineError::TimedOut(budget)) if budget == Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_exceeded_budget_is_recorded_and_alerted() {
    let harness = HarnessBuilder {
        news: Arc::new(StalledNews),
        settings: PipelineSettings {
            run_budget: Some(Duration::from_secs(60)),
            ..PipelineSettings::default()
        },
        ..HarnessBuilder::default()
    }
    .build();

    assert!(harness.pipeline.execute().await.is_err());

    let health = harness.pipeline.monitor().get_health();
    assert_eq!(health.execution_time_ms, 60_000);
    assert_eq!(
        health.run_error.as_deref(),
        Some("pipeline run exceeded its 60s budget")
    );

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("🚨"));
    assert!(sent[0].contains("• Slow execution: 60000ms"));
    assert!(sent[0].contains("Pipeline run failed: pipeline run exceeded its 60s budget"));
}
