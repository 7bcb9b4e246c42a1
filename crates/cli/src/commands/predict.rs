//! Batch prediction command

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

use crate::client::{ApiClient, PredictionResult};
use crate::output::{color_prediction, print_info, print_json, print_warning, OutputFormat};

/// Row for predictions table
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Row")]
    row: usize,
    #[tabled(rename = "Prediction")]
    prediction: i64,
    #[tabled(rename = "Label")]
    label: String,
}

/// Read a record batch from disk. The file holds a JSON array of records,
/// or a JSON string containing that array.
pub fn read_records(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    match &value {
        serde_json::Value::Array(_) | serde_json::Value::String(_) => Ok(value),
        _ => anyhow::bail!("{} must contain an array of records", path.display()),
    }
}

/// Post a record batch and print one prediction per scored row
pub async fn run_predict(client: &ApiClient, file: &Path, format: OutputFormat) -> Result<()> {
    let records = read_records(file)?;
    let result = client.predict(&records).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => print_table(&result),
    }
    Ok(())
}

fn print_table(result: &PredictionResult) {
    println!("{}", "Hazard Predictions".bold());
    println!("{}", "=".repeat(40));
    println!(
        "Model version: {}",
        result.model_version.as_deref().unwrap_or("-").cyan()
    );
    println!();

    if result.predictions.is_empty() {
        print_warning("No rows were scored (every row had missing values)");
        return;
    }

    let rows: Vec<PredictionRow> = result
        .predictions
        .iter()
        .enumerate()
        .map(|(row, &prediction)| PredictionRow {
            row,
            prediction,
            label: color_prediction(prediction),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    let hazardous = result.predictions.iter().filter(|&&p| p == 1).count();
    print_info(&format!(
        "{} of {} objects predicted hazardous",
        hazardous,
        result.predictions.len()
    ));
}
