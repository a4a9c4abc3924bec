//! Collaborator seams used by the pipeline.
//!
//! Each stage is an opaque async operation that either yields a typed
//! result or fails. Production implementations live in `clients`.

use crate::models::{
    Analysis, DeliveryReport, GradedAnalysis, MarketQuote, NewsItem, StoredAnalysis,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch_news(&self) -> Result<Vec<NewsItem>>;
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_quotes(&self) -> Result<Vec<MarketQuote>>;
}

#[async_trait]
pub trait Analyst: Send + Sync {
    /// Analyse whatever inputs are available; either list may be empty.
    async fn analyze(&self, news: &[NewsItem], quotes: &[MarketQuote]) -> Result<GradedAnalysis>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn store_analysis(&self, analysis: &Analysis) -> Result<StoredAnalysis>;

    /// Returns the number of rows written.
    async fn store_news(&self, news: &[NewsItem]) -> Result<usize>;

    /// Returns the number of rows written.
    async fn store_quotes(&self, quotes: &[MarketQuote]) -> Result<usize>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver to every active subscriber. One subscriber's failure must not
    /// stop the others; `Err` means nobody could be reached.
    async fn deliver(&self, analysis: &StoredAnalysis) -> Result<DeliveryReport>;
}

/// The full set of stages a pipeline run needs.
#[derive(Clone)]
pub struct Stages {
    pub news: Arc<dyn NewsSource>,
    pub market: Arc<dyn MarketSource>,
    pub analyst: Arc<dyn Analyst>,
    pub store: Arc<dyn AnalysisStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
}
