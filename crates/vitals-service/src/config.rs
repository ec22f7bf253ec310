//! Service configuration
//!
//! Values come from an optional config file and `VITALS_*` environment
//! variables, the environment taking precedence.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use vitals_lib::detector::{DetectorConfig, DEFAULT_MAX_SAMPLES};
use vitals_lib::source::InfluxConfig;
use vitals_lib::sweep::{SchedulerConfig, SweepConfig};
use vitals_lib::TrainingConfig;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "VITALS_CONFIG_FILE";

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name attached to structured log records
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HTTP port for predictions, training and probes
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding one artifact document per entity
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_influx_url")]
    pub influx_url: String,

    #[serde(default = "default_influx_db")]
    pub influx_db: String,

    #[serde(default)]
    pub influx_user: Option<String>,

    #[serde(default)]
    pub influx_pass: Option<String>,

    #[serde(default = "default_influx_timeout")]
    pub influx_timeout_secs: u64,

    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Field trained on and expected in prediction requests
    #[serde(default = "default_feature_field")]
    pub feature_field: String,

    /// Tag identifying the entity (patient)
    #[serde(default = "default_entity_tag")]
    pub entity_tag: String,

    /// Usable observations required before a model is trained
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Expected fraction of anomalous readings
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Seconds between scheduled training sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Entities trained in parallel during a sweep
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    #[serde(default = "default_sweep_on_startup")]
    pub sweep_on_startup: bool,
}

fn default_service_name() -> String {
    "vitals-ml".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./model")
}

fn default_influx_url() -> String {
    "http://influxdb:8086".to_string()
}

fn default_influx_db() -> String {
    "telemetry".to_string()
}

fn default_influx_timeout() -> u64 {
    5
}

fn default_measurement() -> String {
    "vitals".to_string()
}

fn default_feature_field() -> String {
    vitals_lib::DEFAULT_FEATURE.to_string()
}

fn default_entity_tag() -> String {
    "patient_id".to_string()
}

fn default_min_samples() -> usize {
    vitals_lib::trainer::DEFAULT_MIN_SAMPLES
}

fn default_contamination() -> f64 {
    vitals_lib::detector::DEFAULT_CONTAMINATION
}

fn default_n_estimators() -> usize {
    vitals_lib::detector::DEFAULT_N_ESTIMATORS
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

fn default_seed() -> u64 {
    vitals_lib::detector::DEFAULT_SEED
}

fn default_sweep_interval() -> u64 {
    vitals_lib::sweep::DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_sweep_concurrency() -> usize {
    vitals_lib::sweep::DEFAULT_MAX_CONCURRENCY
}

fn default_sweep_on_startup() -> bool {
    true
}

impl ServiceConfig {
    /// Load configuration from `VITALS_CONFIG_FILE` (if set) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        let builder = config::Config::builder();
        let builder = match file {
            Some(path) => builder.add_source(config::File::with_name(&path)),
            None => builder,
        };

        let config = builder
            .add_source(config::Environment::with_prefix("VITALS").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already built configuration
    pub fn from_config(config: config::Config) -> Result<Self> {
        let service_config: ServiceConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        service_config.validate()?;
        Ok(service_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_concurrency == 0 {
            bail!("sweep_concurrency must be at least 1");
        }
        if self.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be at least 1");
        }
        if self.influx_timeout_secs == 0 {
            bail!("influx_timeout_secs must be at least 1");
        }
        self.training_config()
            .validate()
            .context("Invalid training configuration")?;
        Ok(())
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            contamination: self.contamination,
            seed: self.seed,
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            min_samples: self.min_samples,
            feature_name: self.feature_field.clone(),
            detector: self.detector_config(),
        }
    }

    pub fn influx_config(&self) -> InfluxConfig {
        InfluxConfig {
            url: self.influx_url.clone(),
            database: self.influx_db.clone(),
            username: self.influx_user.clone().filter(|u| !u.is_empty()),
            password: self.influx_pass.clone(),
            measurement: self.measurement.clone(),
            field: self.feature_field.clone(),
            entity_tag: self.entity_tag.clone(),
            timeout: Duration::from_secs(self.influx_timeout_secs),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            max_concurrency: self.sweep_concurrency,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            run_on_startup: self.sweep_on_startup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn from_toml(toml: &str) -> Result<ServiceConfig> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        ServiceConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();

        assert_eq!(config.api_port, 8000);
        assert_eq!(config.model_dir, PathBuf::from("./model"));
        assert_eq!(config.influx_db, "telemetry");
        assert_eq!(config.min_samples, 20);
        assert_eq!(config.contamination, 0.05);
        assert_eq!(config.sweep_interval_secs, 86_400);
        assert_eq!(config.sweep_concurrency, 4);
        assert!(config.sweep_on_startup);
        assert!(config.influx_config().username.is_none());
    }

    #[test]
    fn test_overrides_flow_into_component_configs() {
        let config = from_toml(
            r#"
            min_samples = 50
            contamination = 0.1
            feature_field = "pulse"
            influx_user = "reader"
            influx_pass = "secret"
            sweep_interval_secs = 3600
            "#,
        )
        .unwrap();

        let training = config.training_config();
        assert_eq!(training.min_samples, 50);
        assert_eq!(training.feature_name, "pulse");
        assert_eq!(training.detector.contamination, 0.1);

        let influx = config.influx_config();
        assert_eq!(influx.field, "pulse");
        assert_eq!(influx.username.as_deref(), Some("reader"));

        assert_eq!(config.scheduler_config().interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_rejects_invalid_contamination() {
        let err = from_toml("contamination = 0.9").unwrap_err();
        assert!(format!("{:#}", err).contains("contamination"));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(from_toml("sweep_concurrency = 0").is_err());
    }
}
