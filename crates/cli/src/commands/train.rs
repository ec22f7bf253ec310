//! Train command implementation

use crate::client::{ApiClient, TrainAllResponse, TrainResult};
use crate::output::{
    color_status, print_error, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};
use anyhow::Result;
use tabled::Tabled;

#[derive(Tabled)]
struct TrainRow {
    #[tabled(rename = "PATIENT")]
    patient_id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
}

impl From<&TrainResult> for TrainRow {
    fn from(result: &TrainResult) -> Self {
        Self {
            patient_id: result.patient_id.clone(),
            status: color_status(&result.status),
            message: result.message.clone(),
        }
    }
}

/// Train a single patient's model
pub async fn train_one(client: &ApiClient, patient_id: &str, format: OutputFormat) -> Result<()> {
    let path = format!("/train/{}", patient_id);
    let result: TrainResult = client.post_outcome(&path).await?;

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            let line = format!("{}: {}", result.patient_id, result.message);
            match result.status.as_str() {
                "trained" => print_success(&line),
                "skipped" => print_warning(&line),
                _ => print_error(&line),
            }
        }
    }

    if result.status == "failed" {
        anyhow::bail!("Training failed for patient {}", patient_id);
    }
    Ok(())
}

/// Run a training sweep over every known patient
pub async fn train_all(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: TrainAllResponse = client.post("/train/all", &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            let rows: Vec<TrainRow> = response.results.iter().map(TrainRow::from).collect();
            print_table(&rows);

            let summary = &response.summary;
            print_info(&format!(
                "{} trained, {} skipped, {} failed",
                summary.trained, summary.skipped, summary.failed
            ));
        }
    }

    Ok(())
}
