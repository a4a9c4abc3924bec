//! Energy quotes from the Yahoo Finance quote endpoint.

use super::{ensure_success, ClientError};
use crate::config::MarketConfig;
use crate::models::MarketQuote;
use crate::pipeline::MarketSource;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

const SERVICE: &str = "Yahoo Finance";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteEnvelope {
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Vec<RawQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuote {
    symbol: String,
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    regular_market_change: Option<f64>,
    #[serde(default)]
    regular_market_change_percent: Option<f64>,
}

impl RawQuote {
    /// Quotes without a usable price are dropped.
    fn into_quote(self, timestamp: DateTime<Utc>) -> Option<MarketQuote> {
        let price = self.regular_market_price.filter(|p| *p > 0.0)?;
        Some(MarketQuote {
            symbol: self.symbol,
            price,
            change: self.regular_market_change.unwrap_or(0.0),
            change_percent: self.regular_market_change_percent.unwrap_or(0.0),
            timestamp,
        })
    }
}

/// Market source fetching every configured symbol in one request.
pub struct YahooMarket {
    http: reqwest::Client,
    config: MarketConfig,
}

impl YahooMarket {
    pub fn new(http: reqwest::Client, config: MarketConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl MarketSource for YahooMarket {
    async fn fetch_quotes(&self) -> Result<Vec<MarketQuote>> {
        let symbols = self.config.symbols.join(",");

        let response = self
            .http
            .get(&self.config.quote_url)
            .query(&[("symbols", symbols.as_str())])
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;

        let envelope: QuoteEnvelope = response
            .json()
            .await
            .context("Failed to parse Yahoo Finance response")?;

        let now = Utc::now();
        let requested = envelope.quote_response.result.len();
        let quotes: Vec<MarketQuote> = envelope
            .quote_response
            .result
            .into_iter()
            .filter_map(|raw| raw.into_quote(now))
            .collect();

        if quotes.is_empty() {
            bail!("Yahoo Finance returned no usable quotes");
        }

        debug!("{} of {} quotes had a price", quotes.len(), requested);
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::tests::spawn_server;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    fn market(base: &str) -> YahooMarket {
        YahooMarket::new(
            reqwest::Client::new(),
            MarketConfig {
                quote_url: format!("{}/v7/finance/quote", base),
                symbols: vec!["CL=F".to_string(), "NG=F".to_string(), "XLE".to_string()],
            },
        )
    }

    #[test]
    fn test_quote_without_price_is_skipped() {
        let raw: RawQuote = serde_json::from_value(json!({"symbol": "ENFR"})).unwrap();
        assert!(raw.into_quote(Utc::now()).is_none());

        let raw: RawQuote = serde_json::from_value(json!({
            "symbol": "CL=F",
            "regularMarketPrice": 73.45
        }))
        .unwrap();
        let quote = raw.into_quote(Utc::now()).unwrap();
        assert_eq!(quote.change, 0.0);
        assert_eq!(quote.change_percent, 0.0);
    }

    #[tokio::test]
    async fn test_fetch_quotes() {
        let router = Router::new().route(
            "/v7/finance/quote",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params["symbols"], "CL=F,NG=F,XLE");
                Json(json!({
                    "quoteResponse": {
                        "result": [
                            {"symbol": "CL=F", "regularMarketPrice": 73.45,
                             "regularMarketChange": 0.87, "regularMarketChangePercent": 1.2},
                            {"symbol": "NG=F", "regularMarketPrice": 2.89,
                             "regularMarketChangePercent": -0.8},
                            {"symbol": "XLE"}
                        ]
                    }
                }))
            }),
        );
        let base = spawn_server(router).await;

        let quotes = market(&base).fetch_quotes().await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, "CL=F");
        assert_eq!(quotes[1].change_percent, -0.8);
    }

    #[tokio::test]
    async fn test_empty_result_is_a_failure() {
        let router = Router::new().route(
            "/v7/finance/quote",
            get(|| async { Json(json!({"quoteResponse": {"result": []}})) }),
        );
        let base = spawn_server(router).await;

        let err = market(&base).fetch_quotes().await.unwrap_err();
        assert!(err.to_string().contains("no usable quotes"));
    }

    #[tokio::test]
    async fn test_error_status_is_a_failure() {
        let router = Router::new().route(
            "/v7/finance/quote",
            get(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"finance": {"error": "Invalid Crumb"}})),
                )
            }),
        );
        let base = spawn_server(router).await;

        let err = market(&base).fetch_quotes().await.unwrap_err();
        let client_error = err.downcast_ref::<ClientError>().unwrap();
        assert!(matches!(
            client_error,
            ClientError::Status { status, .. } if status.as_u16() == 401
        ));
    }
}
