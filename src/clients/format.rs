//! Telegram Markdown rendering of an analysis for subscribers.

use crate::models::{Analysis, Prediction};
use chrono::{DateTime, Utc};

/// Render the subscriber message.
pub fn format_analysis(analysis: &Analysis, date: DateTime<Utc>) -> String {
    let mut output = String::new();

    // Header
    output.push_str(&format!(
        "🔥 *Energy Insights AI - {}*\n\n",
        date.format("%A, %B %-d, %Y")
    ));

    output.push_str(&generate_summary_section(analysis));
    output.push_str(&generate_predictions_section(analysis));

    output.push_str("🧠 *Analysis:*\n");
    output.push_str(&escape_markdown(&analysis.reasoning));
    output.push_str("\n\n");

    output.push_str(&generate_footer());

    output
}

fn generate_summary_section(analysis: &Analysis) -> String {
    let mut section = String::new();

    section.push_str("📊 *Market Summary:*\n");
    for point in &analysis.summary {
        section.push_str(&format!(
            "• {} [source]({})\n",
            escape_markdown(&point.text),
            point.source_url
        ));
    }
    section.push('\n');

    section
}

fn generate_predictions_section(analysis: &Analysis) -> String {
    let mut section = String::new();
    let predictions = &analysis.predictions;

    section.push_str("📈 *Probabilistic Outcomes (Next 1-7 Days):*\n\n");
    section.push_str(&prediction_block("🛢️", "Crude Oil", &predictions.crude_oil));
    section.push_str(&prediction_block("⛽", "Natural Gas", &predictions.natural_gas));
    section.push_str(&prediction_block(
        "⚡",
        "Energy Stocks",
        &predictions.energy_stocks,
    ));
    section.push_str(&prediction_block("🏭", "Utilities", &predictions.utilities));

    section
}

fn prediction_block(emoji: &str, label: &str, prediction: &Prediction) -> String {
    format!(
        "{} *{}:* {}\n   _Confidence: {}%_\n   {}\n\n",
        emoji,
        label,
        prediction.direction,
        prediction.confidence,
        escape_markdown(&prediction.reasoning)
    )
}

fn generate_footer() -> String {
    "---\n💡 _This is not financial advice. Trade at your own risk._".to_string()
}

/// Escape the characters Telegram's legacy Markdown treats as markup, so
/// model-written text cannot break message parsing.
pub(crate) fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
