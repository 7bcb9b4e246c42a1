//! Service health command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::client::{ApiClient, HealthReport, Readiness};
use crate::output::{color_status, print_json, print_success, print_warning, OutputFormat};

/// Row for component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct ServiceStatus {
    welcome: String,
    health: HealthReport,
    readiness: Readiness,
}

/// Show the welcome banner, component health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let welcome = client.get_text("/").await?;
    let (_, health): (_, HealthReport) = client.get_status("/healthz").await?;
    let (_, readiness): (_, Readiness) = client.get_status("/readyz").await?;

    match format {
        OutputFormat::Json => print_json(&ServiceStatus {
            welcome,
            health,
            readiness,
        })?,
        OutputFormat::Table => {
            println!("{}", welcome.bold());
            println!("{}", "=".repeat(60));
            println!("Overall: {}", color_status(&health.status));
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&c.status),
                    message: c.message.clone().unwrap_or_default(),
                })
                .collect();
            if !rows.is_empty() {
                println!("{}", Table::new(rows).with(Style::rounded()));
                println!();
            }

            if readiness.ready {
                print_success(&format!(
                    "Ready, serving model version {}",
                    readiness.model_version.as_deref().unwrap_or("-")
                ));
            } else {
                print_warning(&format!(
                    "Not ready: {}",
                    readiness.reason.as_deref().unwrap_or("unknown reason")
                ));
            }
        }
    }
    Ok(())
}
