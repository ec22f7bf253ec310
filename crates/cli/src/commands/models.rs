//! Models command implementation

use crate::client::{ApiClient, ModelInfo, ModelList};
use crate::output::{
    color_status, format_timestamp, print_info, print_json, print_table, OutputFormat,
};
use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "PATIENT")]
    patient_id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "FEATURES")]
    features: String,
    #[tabled(rename = "SAMPLES")]
    sample_count: usize,
    #[tabled(rename = "CONTAMINATION")]
    contamination: String,
    #[tabled(rename = "TRAINED AT")]
    trained_at: String,
}

impl From<&ModelInfo> for ModelRow {
    fn from(model: &ModelInfo) -> Self {
        Self {
            patient_id: model.entity_id.clone(),
            status: color_status(&model.status),
            features: model.feature_names.join(", "),
            sample_count: model.sample_count,
            contamination: format!("{:.3}", model.contamination),
            trained_at: format_timestamp(&model.trained_at),
        }
    }
}

/// List every stored model along with the last sweep
pub async fn list_models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list: ModelList = client.get("/v1/models").await?;

    match format {
        OutputFormat::Json => print_json(&list),
        OutputFormat::Table => {
            println!(
                "{} {} v{} ({})\n",
                "Model:".bold(),
                list.name,
                list.version,
                color_status(&list.status)
            );

            let rows: Vec<ModelRow> = list.models.iter().map(ModelRow::from).collect();
            print_table(&rows);

            match &list.last_sweep {
                Some(sweep) => {
                    println!(
                        "\n{} {} patients, {} trained, {} skipped, {} failed in {}ms (finished {})",
                        "Last sweep:".bold(),
                        sweep.entity_count,
                        sweep.trained.to_string().green(),
                        sweep.skipped.to_string().yellow(),
                        sweep.failed.to_string().red(),
                        sweep.duration_ms,
                        format_timestamp(&sweep.finished_at)
                    );
                    if let Some(error) = &sweep.enumeration_error {
                        println!("  {} {}", "Enumeration error:".red(), error);
                    }
                }
                None => println!("\n{}", "No sweep has completed yet".dimmed()),
            }
        }
    }

    Ok(())
}

/// Show one patient's model
pub async fn show_model(client: &ApiClient, patient_id: &str, format: OutputFormat) -> Result<()> {
    let path = format!("/v1/models/{}", patient_id);
    let model: Option<ModelInfo> = client.get_optional(&path).await?;

    match (model, format) {
        (Some(model), OutputFormat::Json) => print_json(&model),
        (Some(model), OutputFormat::Table) => print_table(&[ModelRow::from(&model)]),
        (None, OutputFormat::Json) => print_json(&serde_json::json!({
            "patient_id": patient_id,
            "status": "not loaded",
        })),
        (None, OutputFormat::Table) => print_info(&format!(
            "No model loaded for patient {}. Run `vitalsctl train {}` first.",
            patient_id, patient_id
        )),
    }

    Ok(())
}
