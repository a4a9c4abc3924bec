//! Data models for the energy insights pipeline.
//!
//! This module contains the core data structures passed between pipeline
//! stages: news items, market quotes, the analysis and its predictions,
//! subscribers and delivery outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Landing page linked from synthetic summary points.
pub const SERVICE_URL: &str = "https://energy-pulse.vercel.app";

/// A news article returned by the news search stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(rename = "published_date")]
    pub published_at: DateTime<Utc>,
    /// Relevance score reported by the search provider (0.0 - 1.0).
    pub score: f64,
}

/// A single market quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub timestamp: DateTime<Utc>,
}

/// Expected price direction over the next 1-7 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Sideways,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
            Direction::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

/// Prediction for one market category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub direction: Direction,
    /// Confidence in percent (0 - 100).
    pub confidence: u8,
    pub reasoning: String,
}

impl Prediction {
    /// Neutral prediction used when no real analysis is available.
    pub fn neutral(reasoning: impl Into<String>) -> Self {
        Self {
            direction: Direction::Sideways,
            confidence: 50,
            reasoning: reasoning.into(),
        }
    }
}

/// Predictions for the four tracked categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub crude_oil: Prediction,
    pub natural_gas: Prediction,
    pub energy_stocks: Prediction,
    pub utilities: Prediction,
}

impl Predictions {
    /// Category keys in display order.
    pub const CATEGORIES: [&'static str; 4] =
        ["crude_oil", "natural_gas", "energy_stocks", "utilities"];

    /// Iterate over `(category, prediction)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Prediction)> {
        Self::CATEGORIES.into_iter().zip([
            &self.crude_oil,
            &self.natural_gas,
            &self.energy_stocks,
            &self.utilities,
        ])
    }

    pub fn len(&self) -> usize {
        Self::CATEGORIES.len()
    }
}

/// One bullet of the market summary, with the article that supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPoint {
    pub text: String,
    pub source_url: String,
}

/// Market analysis produced by the model (or synthesized as a fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: Vec<SummaryPoint>,
    pub predictions: Predictions,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_score: Option<f64>,
}

impl Analysis {
    /// Build the fixed-shape neutral analysis used when the analysis stage
    /// cannot complete.
    pub fn fallback(cause: &str) -> Self {
        let summary = [
            "Market analysis temporarily unavailable due to technical issues",
            "Please check back later for updated insights",
            "Current market conditions require careful monitoring",
            "Energy sector showing mixed signals",
            "Recommend staying informed on key developments",
        ]
        .into_iter()
        .map(|text| SummaryPoint {
            text: text.to_string(),
            source_url: SERVICE_URL.to_string(),
        })
        .collect();

        let neutral = Prediction::neutral("Analysis temporarily unavailable");

        Self {
            summary,
            predictions: Predictions {
                crude_oil: neutral.clone(),
                natural_gas: neutral.clone(),
                energy_stocks: neutral.clone(),
                utilities: neutral,
            },
            reasoning: format!(
                "Market analysis is temporarily unavailable due to technical issues ({}). \
                 Please check back later for comprehensive insights into energy market \
                 conditions and predictions.",
                cause
            ),
            accuracy_score: None,
        }
    }

    /// Reasoning cut to `max_chars` characters, with an ellipsis appended.
    pub fn reasoning_preview(&self, max_chars: usize) -> String {
        let truncated: String = self.reasoning.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// How complete the analysis stage's output is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisQuality {
    /// Model answered from complete inputs.
    Full,
    /// Model answered, but inputs or output were incomplete.
    Partial,
    /// Synthetic neutral analysis.
    Fallback,
}

impl fmt::Display for AnalysisQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisQuality::Full => write!(f, "full"),
            AnalysisQuality::Partial => write!(f, "partial"),
            AnalysisQuality::Fallback => write!(f, "fallback"),
        }
    }
}

/// Analysis together with the quality grade reported by the analysis stage.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedAnalysis {
    pub analysis: Analysis,
    pub quality: AnalysisQuality,
    /// Why the grade is below `Full`, if it is.
    pub note: Option<String>,
}

impl GradedAnalysis {
    pub fn full(analysis: Analysis) -> Self {
        Self {
            analysis,
            quality: AnalysisQuality::Full,
            note: None,
        }
    }
}

/// An analysis with a persistent (or synthetic) identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub analysis: Analysis,
}

impl StoredAnalysis {
    /// Wrap an in-memory analysis that could not be persisted.
    pub fn temporary(analysis: Analysis) -> Self {
        let now = Utc::now();
        Self {
            id: format!("temp-{}", now.timestamp_millis()),
            created_at: now,
            analysis,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with("temp-")
    }
}

/// Guarded upstream dependency categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    News,
    Market,
    Ai,
}

impl Dependency {
    pub const ALL: [Dependency; 3] = [Dependency::News, Dependency::Market, Dependency::Ai];

    /// Circuit breaker name for this dependency.
    pub fn breaker_name(&self) -> &'static str {
        match self {
            Dependency::News => "news-search",
            Dependency::Market => "market-quotes",
            Dependency::Ai => "ai-analysis",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::News => write!(f, "News"),
            Dependency::Market => write!(f, "Market"),
            Dependency::Ai => write!(f, "AI"),
        }
    }
}

/// Last observed status of a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Healthy,
    Degraded,
    Failed,
}

impl DependencyStatus {
    pub fn emoji(&self) -> &'static str {
        match self {
            DependencyStatus::Healthy => "✅",
            DependencyStatus::Degraded => "⚠️",
            DependencyStatus::Failed => "❌",
        }
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyStatus::Healthy => write!(f, "healthy"),
            DependencyStatus::Degraded => write!(f, "degraded"),
            DependencyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A registered recipient of the daily analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub telegram_username: String,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

/// Outcome of fanning an analysis out to subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Active subscribers at delivery time.
    pub subscribers: usize,
    /// Messages actually delivered.
    pub delivered: usize,
}

/// Per-subscriber delivery outcome, as tracked in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}
