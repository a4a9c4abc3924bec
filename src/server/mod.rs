//! Inbound HTTP surface: the pipeline trigger and the health endpoint.
//!
//! ```text
//! GET  /api/cron    Authorization: Bearer <secret>   run the pipeline
//! POST /api/cron    {"action":"trigger_analysis","auth_token":...}
//! GET  /api/health                                   snapshot, 200 or 503
//! POST /api/health  {"action":"send_health_summary","auth_token":...}
//! ```

use crate::health::{HealthSnapshot, OverallStatus};
use crate::pipeline::{Pipeline, PipelineError, RunSummary};
use crate::resilience::BreakerView;
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state of the HTTP handlers.
pub struct AppState {
    pipeline: Arc<Pipeline>,
    trigger_secret: Option<String>,
    started: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, trigger_secret: Option<String>) -> Self {
        Self {
            pipeline,
            trigger_secret: trigger_secret.filter(|s| !s.is_empty()),
            started: Instant::now(),
        }
    }

    /// No configured secret means nobody is authorized.
    fn authorized(&self, token: Option<&str>) -> bool {
        match (self.trigger_secret.as_deref(), token) {
            (Some(secret), Some(token)) => secret == token,
            _ => false,
        }
    }
}

/// Errors returned by the handlers.
#[derive(Debug)]
enum ApiError {
    Unauthorized,
    InvalidAction(String),
    Malformed(String),
    Pipeline(PipelineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::InvalidAction(action) => {
                warn!("Rejected unknown action '{}'", action);
                (StatusCode::BAD_REQUEST, "Invalid action".to_string())
            }
            ApiError::Malformed(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            ApiError::Pipeline(e) => {
                error!("Pipeline run failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        (
            status,
            Json(json!({
                "success": false,
                "error": message,
                "timestamp": Utc::now(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    auth_token: Option<String>,
}

impl ActionRequest {
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        serde_json::from_slice(body).map_err(|e| ApiError::Malformed(format!("Invalid request body: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct RunResponse {
    success: bool,
    message: &'static str,
    data: RunSummary,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: OverallStatus,
    timestamp: DateTime<Utc>,
    version: &'static str,
    uptime_seconds: u64,
    system: HealthSnapshot,
    circuit_breakers: Vec<BreakerView>,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/cron", get(trigger_from_scheduler).post(trigger_manually))
        .route("/api/health", get(health).post(health_action))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn run_pipeline(state: &AppState) -> Result<Json<RunResponse>, ApiError> {
    let summary = state.pipeline.execute().await.map_err(ApiError::Pipeline)?;

    Ok(Json(RunResponse {
        success: true,
        message: "Energy analysis completed successfully",
        data: summary,
    }))
}

async fn trigger_from_scheduler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RunResponse>, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if !state.authorized(token) {
        return Err(ApiError::Unauthorized);
    }

    info!("Scheduled analysis trigger received");
    run_pipeline(&state).await
}

async fn trigger_manually(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RunResponse>, ApiError> {
    let request = ActionRequest::parse(&body)?;

    if !state.authorized(request.auth_token.as_deref()) {
        return Err(ApiError::Unauthorized);
    }
    if request.action != "trigger_analysis" {
        return Err(ApiError::InvalidAction(request.action));
    }

    info!("Manual analysis trigger received");
    run_pipeline(&state).await
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let system = state.pipeline.monitor().get_health();
    let status = system.overall_status();

    let code = match status {
        OverallStatus::Healthy => StatusCode::OK,
        OverallStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = HealthResponse {
        status,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started.elapsed().as_secs(),
        system,
        circuit_breakers: state.pipeline.breakers().views(),
    };
    (code, Json(body))
}

async fn health_action(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = ActionRequest::parse(&body)?;

    if !state.authorized(request.auth_token.as_deref()) {
        return Err(ApiError::Unauthorized);
    }
    if request.action != "send_health_summary" {
        return Err(ApiError::InvalidAction(request.action));
    }

    state.pipeline.monitor().send_daily_summary().await;
    Ok(Json(json!({"success": true, "message": "Health summary sent"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{FailingNews, Harness, HarnessBuilder, StalledNews};
    use crate::pipeline::PipelineSettings;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    fn app(builder: HarnessBuilder) -> (Router, Harness) {
        let harness = builder.build();
        let state = Arc::new(AppState::new(
            harness.pipeline.clone(),
            Some(SECRET.to_string()),
        ));
        (router(state), harness)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_cron(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri("/api/cron");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cron_requires_bearer_secret() {
        let (router, harness) = app(HarnessBuilder::default());

        let (status, body) = call(router.clone(), get_cron(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = call(router, get_cron(Some("Bearer wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(harness.analyst.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cron_runs_pipeline() {
        let (router, harness) = app(HarnessBuilder::default());

        let (status, body) = call(router, get_cron(Some("Bearer s3cret"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["analysis_id"], "analysis-1");
        assert_eq!(body["data"]["summary"]["predictions_generated"], 4);
        assert_eq!(harness.analyst.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_secret_rejects_everything() {
        let harness = HarnessBuilder::default().build();
        let state = Arc::new(AppState::new(
            harness.pipeline.clone(),
            Some(String::new()),
        ));

        let (status, _) = call(router(state), get_cron(Some("Bearer "))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger() {
        let (router, harness) = app(HarnessBuilder::default());

        let (status, body) = call(
            router.clone(),
            post_json("/api/cron", r#"{"action":"trigger_analysis","auth_token":"wrong"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let (status, body) = call(
            router.clone(),
            post_json("/api/cron", r#"{"action":"reboot","auth_token":"s3cret"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid action");

        let (status, body) = call(
            router,
            post_json("/api/cron", r#"{"action":"trigger_analysis","auth_token":"s3cret"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["summary"]["market_symbols"], 3);
        assert_eq!(harness.analyst.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_a_server_error() {
        let (router, _) = app(HarnessBuilder::default());

        let (status, body) = call(router, post_json("/api/cron", "{not json")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_budget_failure_is_500() {
        let (router, _) = app(HarnessBuilder {
            news: Arc::new(StalledNews),
            settings: PipelineSettings {
                run_budget: Some(Duration::from_secs(30)),
                ..PipelineSettings::default()
            },
            ..HarnessBuilder::default()
        });

        let (status, body) = call(router, get_cron(Some("Bearer s3cret"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "pipeline run exceeded its 30s budget");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_degraded_after_failure() {
        let (router, _) = app(HarnessBuilder {
            news: Arc::new(FailingNews),
            ..HarnessBuilder::default()
        });

        let health_request = || {
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = call(router.clone(), health_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = call(router.clone(), get_cron(Some("Bearer s3cret"))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(router, health_request()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["system"]["news_api_status"], "failed");
        assert_eq!(body["system"]["market_api_status"], "healthy");

        let breakers = body["circuit_breakers"].as_array().unwrap();
        let news = breakers
            .iter()
            .find(|b| b["name"] == "news-search")
            .unwrap();
        assert_eq!(news["state"], "CLOSED");
        assert_eq!(news["consecutive_failures"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_summary_action() {
        let (router, harness) = app(HarnessBuilder::default());

        let (status, body) = call(
            router,
            post_json(
                "/api/health",
                r#"{"action":"send_health_summary","auth_token":"s3cret"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Health summary sent");
        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("📊 *Daily Energy Insights Health Report*"));
    }
}
