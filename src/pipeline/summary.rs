//! Structured description of a finished pipeline run.

use crate::models::{
    AnalysisQuality, DeliveryReport, GradedAnalysis, Predictions, StoredAnalysis, SummaryPoint,
};
use serde::Serialize;
use std::time::Duration;

/// Reasoning preview length in the run summary.
const REASONING_PREVIEW_CHARS: usize = 200;

/// Which artifacts were persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageOutcome {
    pub analysis: bool,
    pub news: bool,
    pub market: bool,
}

/// Per-stage counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunCounts {
    pub news_articles: usize,
    pub market_symbols: usize,
    pub predictions_generated: usize,
    pub analysis_quality: AnalysisQuality,
    pub storage: StorageOutcome,
    pub delivery: DeliveryReport,
}

/// The analysis as reported back to the trigger, reasoning truncated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPreview {
    pub summary: Vec<SummaryPoint>,
    pub predictions: Predictions,
    pub reasoning: String,
}

/// Result of one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub analysis_id: String,
    pub execution_time_ms: u64,
    pub summary: RunCounts,
    pub analysis: AnalysisPreview,
}

/// Everything a run produced, before it is reduced to a [`RunSummary`].
pub(crate) struct RunRecord<'a> {
    pub news_articles: usize,
    pub market_symbols: usize,
    pub graded: &'a GradedAnalysis,
    pub stored: &'a StoredAnalysis,
    pub storage: StorageOutcome,
    pub delivery: DeliveryReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub(crate) fn from_record(record: RunRecord<'_>) -> Self {
        let analysis = &record.stored.analysis;

        Self {
            analysis_id: record.stored.id.clone(),
            execution_time_ms: record.elapsed.as_millis() as u64,
            summary: RunCounts {
                news_articles: record.news_articles,
                market_symbols: record.market_symbols,
                predictions_generated: analysis.predictions.len(),
                analysis_quality: record.graded.quality,
                storage: record.storage,
                delivery: record.delivery,
            },
            analysis: AnalysisPreview {
                summary: analysis.summary.clone(),
                predictions: analysis.predictions.clone(),
                reasoning: analysis.reasoning_preview(REASONING_PREVIEW_CHARS),
            },
        }
    }
}
