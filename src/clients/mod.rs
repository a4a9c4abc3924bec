//! HTTP clients for the pipeline's collaborators.
//!
//! Every client shares one `reqwest::Client` built by [`build_http_client`]
//! and reports transport failures as [`ClientError`].

mod analyst;
mod format;
mod market;
mod news;
mod storage;
mod telegram;

pub use analyst::GroqAnalyst;
pub use market::YahooMarket;
pub use news::TavilyNews;
pub use storage::SupabaseStore;
pub use telegram::{TelegramBot, TelegramBroadcaster, TelegramNotifier};

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an external service.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("cannot connect to {service}")]
    Connect { service: &'static str },

    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} is not configured: missing {missing}")]
    NotConfigured {
        service: &'static str,
        missing: &'static str,
    },
}

impl ClientError {
    pub(crate) fn from_send(service: &'static str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::Timeout { service }
        } else if error.is_connect() {
            ClientError::Connect { service }
        } else {
            ClientError::Request {
                service,
                source: error,
            }
        }
    }
}

/// Build the HTTP client shared by all collaborators.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("energy-insights/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// Pass successful responses through, turn anything else into
/// [`ClientError::Status`] carrying the response body.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: Response,
) -> Result<Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status,
        body,
    })
}

/// Require a non-empty configured value.
pub(crate) fn required(
    service: &'static str,
    missing: &'static str,
    value: Option<&str>,
) -> Result<String, ClientError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or(ClientError::NotConfigured { service, missing })
}
