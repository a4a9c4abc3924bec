//! Market analysis through an OpenAI-compatible chat completions API (Groq).
//!
//! The analyst sends one prompt containing the ranked news and the latest
//! quotes, asks for a JSON object back and validates it into an
//! [`Analysis`]. The grade is reported alongside the analysis: `partial`
//! when an input list was empty or the model returned fewer summary
//! points than requested.

use super::{ensure_success, required, ClientError};
use crate::config::ModelConfig;
use crate::models::{
    Analysis, AnalysisQuality, Direction, GradedAnalysis, MarketQuote, NewsItem, Prediction,
    Predictions, SummaryPoint, SERVICE_URL,
};
use crate::pipeline::Analyst;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::{debug, info};

const SERVICE: &str = "Groq";

/// Characters of article content included per news item.
const CONTENT_PREVIEW_CHARS: usize = 300;

/// Chat message sent to the model.
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat completions request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

/// Chat completions response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Summary point as models actually return it: usually an object, sometimes
/// a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSummaryPoint {
    Sourced {
        text: String,
        #[serde(default)]
        source_url: Option<String>,
    },
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawPrediction {
    direction: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawPredictions {
    crude_oil: Option<RawPrediction>,
    natural_gas: Option<RawPrediction>,
    energy_stocks: Option<RawPrediction>,
    utilities: Option<RawPrediction>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: Vec<RawSummaryPoint>,
    predictions: Option<RawPredictions>,
    #[serde(default)]
    reasoning: String,
}

/// Analyst backed by a hosted chat model.
pub struct GroqAnalyst {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl GroqAnalyst {
    pub fn new(http: reqwest::Client, config: ModelConfig) -> Result<Self, ClientError> {
        let api_key = required(SERVICE, "api key", config.api_key.as_deref())?;
        info!("Initializing analyst with model {}", config.name);
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// Send a prompt and return the raw message content.
    async fn send_prompt(&self, prompt: String) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.name,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse Groq response")?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("No response content from Groq API"))
    }
}

#[async_trait]
impl Analyst for GroqAnalyst {
    async fn analyze(&self, news: &[NewsItem], quotes: &[MarketQuote]) -> Result<GradedAnalysis> {
        let prompt = build_prompt(news, quotes, self.config.summary_points);
        debug!("Analysis prompt is {} characters", prompt.len());

        let content = self.send_prompt(prompt).await?;
        let analysis = parse_analysis(&content)?;

        Ok(grade(analysis, news, quotes, self.config.summary_points))
    }
}

/// Build the analyst prompt.
pub(crate) fn build_prompt(news: &[NewsItem], quotes: &[MarketQuote], points: usize) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are an expert energy market analyst with 20+ years of experience. \
         Analyze the following data and provide a comprehensive market analysis.\n\n",
    );

    prompt.push_str("CURRENT NEWS DATA:\n");
    if news.is_empty() {
        prompt.push_str("(no news available today)\n");
    }
    for (i, article) in news.iter().enumerate() {
        let preview: String = article.content.chars().take(CONTENT_PREVIEW_CHARS).collect();
        let _ = writeln!(
            prompt,
            "\n{}. {}\n   Published: {}\n   URL: {}\n   Content: {}...\n   Relevance Score: {}",
            i + 1,
            article.title,
            article.published_at.format("%Y-%m-%d"),
            article.url,
            preview,
            article.score
        );
    }

    prompt.push_str("\nCURRENT MARKET DATA:\n");
    if quotes.is_empty() {
        prompt.push_str("(no market data available today)\n");
    }
    for quote in quotes {
        let sign = if quote.change_percent > 0.0 { "+" } else { "" };
        let _ = writeln!(
            prompt,
            "{}: ${} ({}{:.2}%)",
            quote.symbol, quote.price, sign, quote.change_percent
        );
    }

    let _ = write!(
        prompt,
        "\nRespond with a JSON object of this shape. Provide exactly {points} summary points; \
         for each, include the most relevant source URL from the news data:\n\n"
    );
    prompt.push_str(RESPONSE_SHAPE);
    prompt.push_str(GUIDELINES);

    prompt
}

const RESPONSE_SHAPE: &str = r#"{
  "summary": [
    {"text": "Key bullet point about today's energy developments", "source_url": "URL from the news data"}
  ],
  "predictions": {
    "crude_oil": {"direction": "UP|DOWN|SIDEWAYS", "confidence": 85, "reasoning": "Specific reasoning for crude oil outlook"},
    "natural_gas": {"direction": "UP|DOWN|SIDEWAYS", "confidence": 75, "reasoning": "Specific reasoning for natural gas outlook"},
    "energy_stocks": {"direction": "UP|DOWN|SIDEWAYS", "confidence": 80, "reasoning": "Specific reasoning for energy stocks outlook"},
    "utilities": {"direction": "UP|DOWN|SIDEWAYS", "confidence": 70, "reasoning": "Specific reasoning for utilities outlook"}
  },
  "reasoning": "Comprehensive analysis explaining the interconnections between news events, market data, and predictions. Include historical context, key risks, and catalysts to watch. Minimum 200 words."
}
"#;

const GUIDELINES: &str = "
ANALYSIS GUIDELINES:
- Base predictions on fundamental analysis, technical indicators, and market sentiment
- Consider seasonal patterns, inventory levels, geopolitical events
- Confidence levels should reflect uncertainty and risk factors
- Provide specific reasoning for each prediction
- Include both bullish and bearish scenarios
- Consider time horizons of 1-7 days for predictions
- Factor in correlation between different energy sectors
";

/// Validate the model's JSON into an [`Analysis`].
pub(crate) fn parse_analysis(content: &str) -> Result<Analysis> {
    let raw: RawAnalysis =
        serde_json::from_str(content).context("Model returned malformed analysis JSON")?;

    if raw.summary.is_empty() {
        bail!("Invalid analysis response: missing summary");
    }
    if raw.reasoning.trim().is_empty() {
        bail!("Invalid analysis response: missing reasoning");
    }
    let predictions = raw
        .predictions
        .ok_or_else(|| anyhow!("Invalid analysis response: missing predictions"))?;

    let summary = raw
        .summary
        .into_iter()
        .map(|point| match point {
            RawSummaryPoint::Sourced { text, source_url } => SummaryPoint {
                text,
                source_url: source_url
                    .filter(|url| !url.trim().is_empty())
                    .unwrap_or_else(|| SERVICE_URL.to_string()),
            },
            RawSummaryPoint::Text(text) => SummaryPoint {
                text,
                source_url: SERVICE_URL.to_string(),
            },
        })
        .collect();

    Ok(Analysis {
        summary,
        predictions: Predictions {
            crude_oil: convert_prediction("crude_oil", predictions.crude_oil)?,
            natural_gas: convert_prediction("natural_gas", predictions.natural_gas)?,
            energy_stocks: convert_prediction("energy_stocks", predictions.energy_stocks)?,
            utilities: convert_prediction("utilities", predictions.utilities)?,
        },
        reasoning: raw.reasoning,
        accuracy_score: None,
    })
}

fn convert_prediction(category: &str, raw: Option<RawPrediction>) -> Result<Prediction> {
    let raw = raw.ok_or_else(|| anyhow!("Missing prediction for {}", category))?;

    let direction = match raw.direction.trim().to_uppercase().as_str() {
        "UP" => Direction::Up,
        "DOWN" => Direction::Down,
        "SIDEWAYS" => Direction::Sideways,
        other => bail!("Invalid direction '{}' for {}", other, category),
    };

    let confidence = if raw.confidence.is_finite() {
        raw.confidence.round().clamp(0.0, 100.0) as u8
    } else {
        0
    };

    Ok(Prediction {
        direction,
        confidence,
        reasoning: raw.reasoning,
    })
}

/// Grade the analysis from what went in and what came out.
fn grade(
    analysis: Analysis,
    news: &[NewsItem],
    quotes: &[MarketQuote],
    requested_points: usize,
) -> GradedAnalysis {
    let mut gaps = Vec::new();

    if news.is_empty() {
        gaps.push("no news input".to_string());
    }
    if quotes.is_empty() {
        gaps.push("no market data input".to_string());
    }
    if analysis.summary.len() < requested_points {
        gaps.push(format!(
            "{} of {} summary points",
            analysis.summary.len(),
            requested_points
        ));
    }

    if gaps.is_empty() {
        GradedAnalysis::full(analysis)
    } else {
        GradedAnalysis {
            analysis,
            quality: AnalysisQuality::Partial,
            note: Some(gaps.join(", ")),
        }
    }
}
