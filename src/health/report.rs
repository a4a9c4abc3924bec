//! Text rendering for operator alerts and the daily digest.

use super::{Alert, HealthSnapshot};
use crate::models::{AnalysisQuality, Dependency, DependencyStatus};
use chrono::{DateTime, Utc};

/// Render a consolidated alert message.
pub fn render_alert(alert: &Alert, health: &HealthSnapshot, now: DateTime<Utc>) -> String {
    let status = serde_json::to_string_pretty(health).unwrap_or_else(|_| "{}".to_string());

    format!(
        "{} *Energy Insights System Alert*\n\nSystem issues detected:\n• {}\n\nTime: {}\nStatus: {}",
        alert.severity.emoji(),
        alert.issues.join("\n• "),
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        status
    )
}

/// Render the daily health digest.
pub fn render_daily_summary(health: &HealthSnapshot) -> String {
    let mut lines = Vec::new();

    lines.push("📊 *Daily Energy Insights Health Report*".to_string());
    lines.push(String::new());
    lines.push(format!(
        "🔍 APIs: News {} | Market {} | AI {}",
        health.news_api_status.emoji(),
        health.market_api_status.emoji(),
        health.ai_api_status.emoji()
    ));
    lines.push(format!(
        "📈 Analysis Quality: {}",
        health.analysis_quality.to_string().to_uppercase()
    ));
    lines.push(format!("⏱️ Execution Time: {}ms", health.execution_time_ms));
    lines.push(format!("👥 Subscribers: {}", health.subscriber_count));
    lines.push(format!("📱 Messages Sent: {}", health.messages_sent));
    lines.push(String::new());
    lines.push(format!("System Status: {}", digest_status(health)));

    lines.join("\n")
}

fn digest_status(health: &HealthSnapshot) -> &'static str {
    let all_down = Dependency::ALL
        .iter()
        .all(|d| health.status_of(*d) == DependencyStatus::Failed);

    if all_down {
        "🚨 CRITICAL"
    } else if health.analysis_quality == AnalysisQuality::Fallback
        || health.messages_sent == 0
        || health.run_error.is_some()
    {
        "⚠️ DEGRADED"
    } else {
        "✅ HEALTHY"
    }
}
