//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
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

/// Human label for a model output
pub fn prediction_label(prediction: i64) -> &'static str {
    if prediction == 1 {
        "hazardous"
    } else {
        "not hazardous"
    }
}

/// Color a prediction label
pub fn color_prediction(prediction: i64) -> String {
    let label = prediction_label(prediction);
    if prediction == 1 {
        label.red().bold().to_string()
    } else {
        label.green().to_string()
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" => status.green().to_string(),
        "degraded" => status.yellow().to_string(),
        "unhealthy" | "not ready" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_labels() {
        assert_eq!(prediction_label(1), "hazardous");
        assert_eq!(prediction_label(0), "not hazardous");
    }

    #[test]
    fn test_color_status_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_status("degraded"), "degraded");
        assert_eq!(color_status("unknown"), "unknown");
    }
}
