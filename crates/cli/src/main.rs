//! Vitals anomaly model service CLI
//!
//! A command-line tool for checking service health, inspecting per-patient
//! models, requesting predictions and triggering training.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, models, predict, train};

/// Vitals anomaly model service CLI
#[derive(Parser)]
#[command(name = "vitalsctl")]
#[command(author, version, about = "CLI for the Vitals Anomaly Model Service", long_about = None)]
pub struct Cli {
    /// Service URL (can also be set via VITALS_API_URL env var)
    #[arg(long, env = "VITALS_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show service and component health
    Health,

    /// List trained models, or show one patient's model
    Models {
        /// Patient ID (lists every model if omitted)
        patient_id: Option<String>,
    },

    /// Score a reading against a patient's model
    Predict {
        /// Patient ID
        patient_id: String,

        /// Heart rate reading (shorthand for --feature heart_rate=<value>)
        #[arg(long)]
        heart_rate: Option<f64>,

        /// Feature value as name=value (repeatable)
        #[arg(long = "feature", value_name = "NAME=VALUE", value_parser = parse_feature)]
        features: Vec<(String, f64)>,
    },

    /// Train one patient's model, or every patient with --all
    Train {
        /// Patient ID
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        patient_id: Option<String>,

        /// Train every known patient
        #[arg(long)]
        all: bool,
    },
}

/// Parse a `name=value` feature argument
fn parse_feature(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing feature name in '{}'", raw));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid number '{}' for feature '{}'", value.trim(), name))?;
    if !value.is_finite() {
        return Err(format!("feature '{}' must be a finite number", name));
    }
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Health => {
            health::show_health(&client, cli.format).await?;
        }
        Commands::Models { patient_id } => match patient_id {
            Some(patient_id) => models::show_model(&client, &patient_id, cli.format).await?,
            None => models::list_models(&client, cli.format).await?,
        },
        Commands::Predict {
            patient_id,
            heart_rate,
            features,
        } => {
            predict::predict(&client, &patient_id, heart_rate, features, cli.format).await?;
        }
        // clap guarantees exactly one of a patient id or --all
        Commands::Train { patient_id, all } => match patient_id {
            Some(patient_id) if !all => {
                train::train_one(&client, &patient_id, cli.format).await?
            }
            _ => train::train_all(&client, cli.format).await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_feature() {
        assert_eq!(
            parse_feature("heart_rate=72.5").unwrap(),
            ("heart_rate".to_string(), 72.5)
        );
        assert_eq!(parse_feature(" spo2 = 97 ").unwrap(), ("spo2".to_string(), 97.0));
    }

    #[test]
    fn test_parse_feature_rejects_bad_input() {
        assert!(parse_feature("heart_rate").is_err());
        assert!(parse_feature("=72").is_err());
        assert!(parse_feature("heart_rate=fast").is_err());
        assert!(parse_feature("heart_rate=NaN").is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_train_requires_patient_or_all() {
        assert!(Cli::try_parse_from(["vitalsctl", "train"]).is_err());
        assert!(Cli::try_parse_from(["vitalsctl", "train", "p1", "--all"]).is_err());
        assert!(Cli::try_parse_from(["vitalsctl", "train", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["vitalsctl", "train", "p1"]).is_ok());
    }

    #[test]
    fn test_predict_collects_repeated_features() {
        let cli = Cli::try_parse_from([
            "vitalsctl",
            "predict",
            "p1",
            "--feature",
            "heart_rate=72",
            "--feature",
            "spo2=97",
        ])
        .unwrap();

        match cli.command {
            Commands::Predict { features, .. } => assert_eq!(features.len(), 2),
            _ => panic!("expected predict command"),
        }
    }
}
