//! Predict command implementation

use crate::client::{ApiClient, PredictRequest, PredictResponse};
use crate::output::{format_score, print_json, print_success, print_warning, OutputFormat};
use anyhow::Result;

/// Score one reading against a patient's model
pub async fn predict(
    client: &ApiClient,
    patient_id: &str,
    heart_rate: Option<f64>,
    features: Vec<(String, f64)>,
    format: OutputFormat,
) -> Result<()> {
    if heart_rate.is_none() && features.is_empty() {
        anyhow::bail!("Provide --heart-rate or at least one --feature NAME=VALUE");
    }

    let request = PredictRequest {
        patient_id: patient_id.to_string(),
        heart_rate,
        features: features.into_iter().collect(),
    };

    let response: PredictResponse = client.post("/predict", &request).await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            let score = format_score(response.anomaly_score);
            if response.prediction {
                print_warning(&format!(
                    "Anomaly detected for patient {} (score {})",
                    patient_id, score
                ));
            } else {
                print_success(&format!(
                    "Reading is normal for patient {} (score {})",
                    patient_id, score
                ));
            }
        }
    }

    Ok(())
}
