//! Health command implementation

use crate::client::{ApiClient, HealthReport};
use crate::output::{color_status, format_timestamp_secs, print_json, print_table, OutputFormat};
use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "COMPONENT")]
    name: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
    #[tabled(rename = "LAST CHECK")]
    last_check: String,
}

/// Show service health and per-component status
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthReport = client.get("/health").await?;

    match format {
        OutputFormat::Json => print_json(&health),
        OutputFormat::Table => {
            println!("{} {}\n", "Service:".bold(), color_status(&health.status));

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_else(|| "-".to_string()),
                    last_check: format_timestamp_secs(component.last_check_timestamp),
                })
                .collect();
            print_table(&rows);
        }
    }

    Ok(())
}
