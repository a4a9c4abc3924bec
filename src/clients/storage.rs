//! Persistence through the Supabase PostgREST API.

use super::{ensure_success, required, ClientError};
use crate::config::StorageConfig;
use crate::models::{
    Analysis, MarketQuote, NewsItem, NotificationStatus, Predictions, StoredAnalysis, Subscriber,
    SummaryPoint,
};
use crate::pipeline::AnalysisStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SERVICE: &str = "Supabase";

/// Who receives the analysis, and where delivery outcomes are recorded.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Active users with a Telegram chat id.
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>>;

    async fn track_notification(
        &self,
        user_id: &str,
        analysis_id: &str,
        status: NotificationStatus,
        error: Option<&str>,
    ) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct AnalysisRow<'a> {
    news_summary: &'a [SummaryPoint],
    market_predictions: &'a Predictions,
    reasoning: &'a str,
    accuracy_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StoredAnalysisRow {
    id: Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct NewsRow<'a> {
    title: &'a str,
    url: &'a str,
    content: &'a str,
    published_date: DateTime<Utc>,
    score: f64,
}

#[derive(Debug, Serialize)]
struct MarketRow<'a> {
    symbol: &'a str,
    price: f64,
    change_amount: f64,
    change_percent: f64,
}

#[derive(Debug, Serialize)]
struct NotificationRow<'a> {
    user_id: &'a str,
    analysis_id: &'a str,
    sent_at: DateTime<Utc>,
    delivery_status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: Value,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    telegram_username: Option<String>,
    #[serde(default)]
    telegram_chat_id: Option<Value>,
}

impl From<UserRow> for Subscriber {
    fn from(row: UserRow) -> Self {
        Subscriber {
            id: value_to_string(&row.id),
            email: row.email.unwrap_or_default(),
            telegram_username: row.telegram_username.unwrap_or_default(),
            telegram_chat_id: row
                .telegram_chat_id
                .as_ref()
                .filter(|v| !v.is_null())
                .map(value_to_string),
        }
    }
}

/// Ids and chat ids come back as strings or numbers depending on the schema.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// PostgREST-backed store.
pub struct SupabaseStore {
    http: reqwest::Client,
    rest_url: String,
    key: String,
}

impl SupabaseStore {
    pub fn new(http: reqwest::Client, config: &StorageConfig) -> Result<Self, ClientError> {
        let url = required(SERVICE, "project url", config.url.as_deref())?;
        let key = required(SERVICE, "service role key", config.service_key.as_deref())?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            key,
        })
    }

    fn table(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn insert<T: Serialize + ?Sized>(&self, table: &str, rows: &T) -> Result<()> {
        let response = self
            .table(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalysisStore for SupabaseStore {
    async fn store_analysis(&self, analysis: &Analysis) -> Result<StoredAnalysis> {
        let row = AnalysisRow {
            news_summary: &analysis.summary,
            market_predictions: &analysis.predictions,
            reasoning: &analysis.reasoning,
            accuracy_score: analysis.accuracy_score,
        };

        let response = self
            .table(reqwest::Method::POST, "analysis_results")
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;

        let rows: Vec<StoredAnalysisRow> = response
            .json()
            .await
            .context("Failed to parse stored analysis")?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Supabase returned no analysis row"))?;

        Ok(StoredAnalysis {
            id: value_to_string(&stored.id),
            created_at: stored.created_at,
            analysis: analysis.clone(),
        })
    }

    async fn store_news(&self, news: &[NewsItem]) -> Result<usize> {
        if news.is_empty() {
            return Ok(0);
        }

        let rows: Vec<NewsRow<'_>> = news
            .iter()
            .map(|item| NewsRow {
                title: &item.title,
                url: &item.url,
                content: &item.content,
                published_date: item.published_at,
                score: item.score,
            })
            .collect();

        let response = self
            .table(reqwest::Method::POST, "news_articles")
            .query(&[("on_conflict", "url")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;

        Ok(rows.len())
    }

    async fn store_quotes(&self, quotes: &[MarketQuote]) -> Result<usize> {
        if quotes.is_empty() {
            return Ok(0);
        }

        let rows: Vec<MarketRow<'_>> = quotes
            .iter()
            .map(|quote| MarketRow {
                symbol: &quote.symbol,
                price: quote.price,
                change_amount: quote.change,
                change_percent: quote.change_percent,
            })
            .collect();

        self.insert("market_data", &rows).await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl SubscriberDirectory for SupabaseStore {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>> {
        let response = self
            .table(reqwest::Method::GET, "users")
            .query(&[
                ("select", "*"),
                ("is_active", "eq.true"),
                ("telegram_chat_id", "not.is.null"),
            ])
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;

        let rows: Vec<UserRow> = response
            .json()
            .await
            .context("Failed to parse active users")?;
        Ok(rows.into_iter().map(Subscriber::from).collect())
    }

    async fn track_notification(
        &self,
        user_id: &str,
        analysis_id: &str,
        status: NotificationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let row = NotificationRow {
            user_id,
            analysis_id,
            sent_at: Utc::now(),
            delivery_status: status,
            error_message: error,
        };
        self.insert("user_notifications", &[row]).await
    }
}
