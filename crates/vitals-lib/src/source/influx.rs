//! InfluxDB 1.x observation source
//!
//! Talks to the `/query` HTTP endpoint. Readings come from one field of one
//! measurement, with entities distinguished by a tag.

use super::{EntitySource, ObservationSource};
use crate::error::SourceError;
use crate::models::{Observation, DEFAULT_FEATURE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Connection and schema settings for the InfluxDB source
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://influxdb:8086`
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Measurement holding the vitals
    pub measurement: String,
    /// Field read as the observation value
    pub field: String,
    /// Tag carrying the entity id
    pub entity_tag: String,
    pub timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://influxdb:8086".to_string(),
            database: "telemetry".to_string(),
            username: None,
            password: None,
            measurement: "vitals".to_string(),
            field: DEFAULT_FEATURE.to_string(),
            entity_tag: "patient_id".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Observation source reading from InfluxDB over HTTP
pub struct InfluxSource {
    client: Client,
    query_url: Url,
    config: InfluxConfig,
}

impl InfluxSource {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let query_url = Url::parse(&config.url)
            .and_then(|base| base.join("query"))
            .with_context(|| format!("Invalid InfluxDB URL {:?}", config.url))?;

        info!(
            url = %config.url,
            database = %config.database,
            measurement = %config.measurement,
            field = %config.field,
            "Configured InfluxDB observation source"
        );

        Ok(Self {
            client,
            query_url,
            config,
        })
    }

    /// Query selecting one entity's readings
    pub fn observations_query(&self, entity_id: &str) -> String {
        let field = quote_identifier(&self.config.field);
        format!(
            "SELECT {field} FROM {measurement} WHERE {field} > 0 AND {tag} = '{id}'",
            field = field,
            measurement = quote_identifier(&self.config.measurement),
            tag = quote_identifier(&self.config.entity_tag),
            id = escape_influx_string(entity_id),
        )
    }

    /// Query listing every entity id
    pub fn entity_ids_query(&self) -> String {
        format!(
            "SHOW TAG VALUES FROM {} WITH KEY = {}",
            quote_identifier(&self.config.measurement),
            quote_identifier(&self.config.entity_tag),
        )
    }

    async fn query(&self, q: &str) -> Result<QueryResponse, SourceError> {
        debug!(query = %q, "Querying InfluxDB");

        let mut request = self
            .client
            .get(self.query_url.clone())
            .query(&[("db", self.config.database.as_str()), ("q", q)]);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(SourceError::Query(error));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ObservationSource for InfluxSource {
    async fn fetch(&self, entity_id: &str) -> Result<Vec<Observation>, SourceError> {
        let response = self.query(&self.observations_query(entity_id)).await?;
        let observations = parse_observations(entity_id, &self.config.field, response)?;

        if observations.is_empty() {
            warn!(entity_id = %entity_id, "No observations found");
        } else {
            info!(entity_id = %entity_id, count = observations.len(), "Retrieved observations");
        }
        Ok(observations)
    }
}

#[async_trait]
impl EntitySource for InfluxSource {
    async fn list_entity_ids(&self) -> Result<Vec<String>, SourceError> {
        let response = self.query(&self.entity_ids_query()).await?;
        parse_tag_values(response)
    }
}

fn parse_observations(
    entity_id: &str,
    field: &str,
    response: QueryResponse,
) -> Result<Vec<Observation>, SourceError> {
    let mut observations = Vec::new();

    for result in response.results {
        if let Some(error) = result.error {
            return Err(SourceError::Query(error));
        }

        for series in result.series {
            let time_index = column_index(&series.columns, "time")?;
            let value_index = column_index(&series.columns, field)?;

            for row in &series.values {
                let timestamp = match row.get(time_index).and_then(Value::as_str).map(parse_time) {
                    Some(Ok(ts)) => ts,
                    Some(Err(e)) => {
                        warn!(entity_id = %entity_id, error = %e, "Invalid timestamp, skipping point");
                        continue;
                    }
                    None => {
                        warn!(entity_id = %entity_id, "Point without timestamp, skipping");
                        continue;
                    }
                };

                match row.get(value_index) {
                    Some(Value::Number(n)) => match n.as_f64() {
                        Some(value) => observations.push(Observation::new(entity_id, timestamp, value)),
                        None => observations.push(Observation::missing(entity_id, timestamp)),
                    },
                    Some(Value::Null) | None => {
                        observations.push(Observation::missing(entity_id, timestamp))
                    }
                    Some(other) => {
                        warn!(entity_id = %entity_id, value = %other, "Non-numeric value, skipping point");
                    }
                }
            }
        }
    }

    Ok(observations)
}

fn parse_tag_values(response: QueryResponse) -> Result<Vec<String>, SourceError> {
    let mut ids = Vec::new();

    for result in response.results {
        if let Some(error) = result.error {
            return Err(SourceError::Query(error));
        }
        for series in result.series {
            let value_index = column_index(&series.columns, "value")?;
            ids.extend(
                series
                    .values
                    .iter()
                    .filter_map(|row| row.get(value_index).and_then(Value::as_str))
                    .map(str::to_string),
            );
        }
    }

    Ok(ids)
}

fn column_index(columns: &[String], name: &str) -> Result<usize, SourceError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| SourceError::Malformed(format!("missing column '{}'", name)))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

/// Escape a value for use inside a single-quoted InfluxQL string literal
pub fn escape_influx_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

fn quote_identifier(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}
