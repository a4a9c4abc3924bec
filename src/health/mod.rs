//! Process health tracking and operator alerting.
//!
//! The [`HealthMonitor`] keeps the latest status of each guarded
//! dependency plus run-level metrics. Every field is overwritten by the
//! next run, never accumulated. After a run the orchestrator asks the
//! monitor to evaluate its alert rules; at most one consolidated alert is
//! sent per evaluation.

mod report;

pub use report::{render_alert, render_daily_summary};

use crate::models::{AnalysisQuality, Dependency, DependencyStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

/// Outbound channel for operator messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}

/// Notifier used when no admin channel is configured: messages go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        info!("Admin alert (no admin chat configured):\n{}", message);
        Ok(())
    }
}

/// Latest observed health of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub news_api_status: DependencyStatus,
    pub market_api_status: DependencyStatus,
    pub ai_api_status: DependencyStatus,
    pub analysis_quality: AnalysisQuality,
    pub execution_time_ms: u64,
    pub subscriber_count: usize,
    pub messages_sent: usize,
    /// The delivery channel could not be reached at all.
    #[serde(default)]
    pub delivery_failed: bool,
    /// Set when the latest run ended in an orchestrator failure.
    #[serde(default)]
    pub run_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            news_api_status: DependencyStatus::Healthy,
            market_api_status: DependencyStatus::Healthy,
            ai_api_status: DependencyStatus::Healthy,
            analysis_quality: AnalysisQuality::Full,
            execution_time_ms: 0,
            subscriber_count: 0,
            messages_sent: 0,
            delivery_failed: false,
            run_error: None,
            timestamp: Utc::now(),
        }
    }
}

impl HealthSnapshot {
    pub fn status_of(&self, dependency: Dependency) -> DependencyStatus {
        match dependency {
            Dependency::News => self.news_api_status,
            Dependency::Market => self.market_api_status,
            Dependency::Ai => self.ai_api_status,
        }
    }

    pub fn any_failed(&self) -> bool {
        Dependency::ALL
            .iter()
            .any(|d| self.status_of(*d) == DependencyStatus::Failed)
    }

    /// `degraded` as soon as any dependency failed, `healthy` otherwise.
    pub fn overall_status(&self) -> OverallStatus {
        if self.any_failed() {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        }
    }

    fn delivery_stalled(&self) -> bool {
        self.messages_sent == 0 && self.subscriber_count > 0
    }

    fn needs_error_alert(&self) -> bool {
        self.any_failed() || self.delivery_stalled() || self.delivery_failed || self.run_error.is_some()
    }
}

/// Status reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
}

impl AlertSeverity {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "⚠️",
            AlertSeverity::Error => "🚨",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Error => write!(f, "error"),
        }
    }
}

/// A consolidated alert raised by [`HealthMonitor::check_health_and_alert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub issues: Vec<String>,
}

/// Execution-time limits, relative to the trigger's timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Log a warning when a run takes at least this long.
    pub slow_warning: Duration,
    /// Raise an alert when a run takes longer than this.
    pub slow_alert: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            slow_warning: Duration::from_secs(45),
            slow_alert: Duration::from_secs(50),
        }
    }
}

/// Holds the health snapshot and decides when to alert operators.
pub struct HealthMonitor {
    snapshot: Mutex<HealthSnapshot>,
    notifier: Arc<dyn Notifier>,
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    /// Create a monitor with optimistic defaults.
    pub fn new(notifier: Arc<dyn Notifier>, thresholds: HealthThresholds) -> Self {
        Self {
            snapshot: Mutex::new(HealthSnapshot::default()),
            notifier,
            thresholds,
        }
    }

    /// Clear the per-run delivery and failure fields at the start of a run.
    pub fn start_run(&self) {
        self.update(|health| {
            health.subscriber_count = 0;
            health.messages_sent = 0;
            health.delivery_failed = false;
            health.run_error = None;
        });
    }

    pub fn record_dependency_status(&self, dependency: Dependency, status: DependencyStatus) {
        if status == DependencyStatus::Failed {
            error!("{} API failure detected", dependency);
        }
        self.update(|health| match dependency {
            Dependency::News => health.news_api_status = status,
            Dependency::Market => health.market_api_status = status,
            Dependency::Ai => health.ai_api_status = status,
        });
    }

    pub fn record_analysis_quality(&self, quality: AnalysisQuality, detail: Option<&str>) {
        if quality == AnalysisQuality::Fallback {
            let detail: String = detail.unwrap_or("no detail").chars().take(100).collect();
            warn!("Fallback analysis used: {}", detail);
        }
        self.update(|health| health.analysis_quality = quality);
    }

    pub fn record_execution_time(&self, elapsed: Duration) {
        if elapsed >= self.thresholds.slow_warning {
            warn!("Slow execution detected: {}ms", elapsed.as_millis());
        }
        self.update(|health| health.execution_time_ms = elapsed.as_millis() as u64);
    }

    pub fn record_delivery(&self, subscriber_count: usize, messages_sent: usize) {
        self.update(|health| {
            health.subscriber_count = subscriber_count;
            health.messages_sent = messages_sent;
            health.delivery_failed = false;
        });
    }

    /// Record that no subscriber could be reached.
    pub fn record_delivery_failure(&self, error: &str) {
        error!("Delivery channel unreachable: {}", error);
        self.update(|health| {
            health.subscriber_count = 0;
            health.messages_sent = 0;
            health.delivery_failed = true;
        });
    }

    /// Record a run that ended in an orchestrator failure after `elapsed`.
    pub fn record_run_failure(&self, elapsed: Duration, error: &str) {
        error!("Pipeline run failed after {}ms: {}", elapsed.as_millis(), error);
        self.update(|health| {
            health.execution_time_ms = elapsed.as_millis() as u64;
            health.run_error = Some(error.to_string());
        });
    }

    /// Copy of the current snapshot.
    pub fn get_health(&self) -> HealthSnapshot {
        self.lock().clone()
    }

    /// Evaluate the alert rules against the current snapshot.
    pub fn evaluate(&self) -> Option<Alert> {
        let health = self.get_health();
        let mut issues = Vec::new();

        for dependency in Dependency::ALL {
            if health.status_of(dependency) == DependencyStatus::Failed {
                issues.push(format!("{} API is down", dependency));
            }
        }

        if health.analysis_quality == AnalysisQuality::Fallback {
            issues.push("Using fallback analysis (AI unavailable)".to_string());
        }

        if health.execution_time_ms > self.thresholds.slow_alert.as_millis() as u64 {
            issues.push(format!("Slow execution: {}ms", health.execution_time_ms));
        }

        if health.delivery_stalled() {
            issues.push("No messages sent despite having subscribers".to_string());
        }

        if health.delivery_failed {
            issues.push("Delivery channel unreachable, no messages sent".to_string());
        }

        if let Some(error) = &health.run_error {
            issues.push(format!("Pipeline run failed: {}", error));
        }

        if issues.is_empty() {
            return None;
        }

        let severity = if health.needs_error_alert() {
            AlertSeverity::Error
        } else {
            AlertSeverity::Warning
        };

        Some(Alert { severity, issues })
    }

    /// Send one consolidated alert if any rule fires. Notification
    /// failures are logged and swallowed.
    pub async fn check_health_and_alert(&self) -> Option<Alert> {
        let alert = self.evaluate()?;
        let message = render_alert(&alert, &self.get_health(), Utc::now());

        match self.notifier.notify(&message).await {
            Ok(()) => info!("Admin {} alert sent ({} issues)", alert.severity, alert.issues.len()),
            Err(e) => error!("Failed to send admin alert: {:#}", e),
        }

        Some(alert)
    }

    /// Send the daily digest, regardless of alert rules.
    pub async fn send_daily_summary(&self) {
        let summary = render_daily_summary(&self.get_health());

        if let Err(e) = self.notifier.notify(&summary).await {
            error!("Failed to send health summary: {:#}", e);
        }
    }

    fn update(&self, f: impl FnOnce(&mut HealthSnapshot)) {
        let mut health = self.lock();
        f(&mut health);
        health.timestamp = Utc::now();
    }

    fn lock(&self) -> MutexGuard<'_, HealthSnapshot> {
        self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
