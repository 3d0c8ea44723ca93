//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use pulse_lib::models::{HealthTier, ReadinessScore};
use serde::{Deserialize, Serialize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format milliseconds with one decimal
pub fn format_ms(value: f64) -> String {
    format!("{:.1} ms", value)
}

/// Format a loss percentage
pub fn format_loss(percent: f64) -> String {
    format!("{:.2}%", percent)
}

/// Color the tier the way the dashboard does: green, amber, red
pub fn color_tier(tier: HealthTier) -> String {
    let label = tier.as_str().to_uppercase();
    match tier {
        HealthTier::Good => label.green().bold().to_string(),
        HealthTier::Warning => label.yellow().bold().to_string(),
        HealthTier::Critical => label.red().bold().to_string(),
    }
}

/// Color a readiness score by band
pub fn color_score(score: ReadinessScore) -> String {
    let formatted = format!("{}/100", score.value());
    match score.value() {
        80..=100 => formatted.green().to_string(),
        50..=79 => formatted.yellow().to_string(),
        _ => formatted.red().to_string(),
    }
}
