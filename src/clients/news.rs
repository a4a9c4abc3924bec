//! Market-moving news search via the Tavily API.

use super::{ensure_success, required, ClientError};
use crate::config::NewsConfig;
use crate::models::NewsItem;
use crate::pipeline::NewsSource;
use crate::resilience::{retry, RetryPolicy};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

const SERVICE: &str = "Tavily";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: String,
    search_depth: &'static str,
    include_answer: bool,
    max_results: usize,
    include_domains: &'a [String],
    exclude_domains: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl SearchResult {
    fn into_item(self, now: DateTime<Utc>) -> NewsItem {
        NewsItem {
            published_at: self
                .published_date
                .as_deref()
                .and_then(parse_published)
                .unwrap_or(now),
            score: self.score.unwrap_or(0.5),
            title: self.title,
            url: self.url,
            content: self.content,
        }
    }
}

/// Tavily returns RFC 3339 or RFC 2822 dates depending on the source.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|date| date.with_timezone(&Utc))
        .ok()
}

/// News source running several searches and merging the results.
pub struct TavilyNews {
    http: reqwest::Client,
    config: NewsConfig,
    api_key: String,
    retry: RetryPolicy,
}

impl TavilyNews {
    pub fn new(
        http: reqwest::Client,
        config: NewsConfig,
        retry: RetryPolicy,
    ) -> Result<Self, ClientError> {
        let api_key = required(SERVICE, "api key", config.api_key.as_deref())?;
        Ok(Self {
            http,
            config,
            api_key,
            retry,
        })
    }

    /// One query, retried with backoff.
    async fn search(&self, query: &str) -> Result<Vec<NewsItem>> {
        let label = format!("Tavily search '{}'", query);
        let items = retry(&self.retry, &label, || self.search_once(query)).await?;
        Ok(items)
    }

    async fn search_once(&self, query: &str) -> Result<Vec<NewsItem>> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query: format!("{} energy market news today", query),
            search_depth: "advanced",
            include_answer: true,
            max_results: self.config.results_per_query,
            include_domains: &self.config.include_domains,
            exclude_domains: &self.config.exclude_domains,
        };

        let response = self
            .http
            .post(&self.config.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Tavily response")?;

        let now = Utc::now();
        Ok(body.results.into_iter().map(|r| r.into_item(now)).collect())
    }
}

#[async_trait]
impl NewsSource for TavilyNews {
    async fn fetch_news(&self) -> Result<Vec<NewsItem>> {
        let searches = self.config.queries.iter().map(|query| async move {
            let result = self.search(query).await;
            (query, result)
        });

        let mut collected = Vec::new();
        let mut last_error = None;
        let mut failed = 0;

        for (query, result) in join_all(searches).await {
            match result {
                Ok(items) => {
                    debug!("Query '{}' returned {} articles", query, items.len());
                    collected.extend(items);
                }
                Err(e) => {
                    warn!("Failed to search for '{}': {:#}", query, e);
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if failed > 0 && failed == self.config.queries.len() {
            let cause = last_error.unwrap_or_else(|| anyhow!("no queries ran"));
            return Err(cause.context(format!("All {} news searches failed", failed)));
        }

        let ranked = rank_news(collected, self.config.keep_top);
        info!(
            "Collected {} news articles ({} of {} queries failed)",
            ranked.len(),
            failed,
            self.config.queries.len()
        );
        Ok(ranked)
    }
}

/// Relevance weight: mostly the provider score, partly recency.
fn weight(item: &NewsItem) -> f64 {
    item.score * 0.7 + (item.published_at.timestamp_millis() as f64 / 1e9) * 0.3
}

/// Drop duplicate URLs (first occurrence wins), order by weight and keep
/// the best `keep`.
pub(crate) fn rank_news(items: Vec<NewsItem>, keep: usize) -> Vec<NewsItem> {
    let mut seen = HashSet::new();
    let mut unique: Vec<NewsItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.url.clone()))
        .collect();

    unique.sort_by(|a, b| weight(b).total_cmp(&weight(a)));
    unique.truncate(keep);
    unique
}
