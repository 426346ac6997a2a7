use crate::app_url::resolve_api_base_url;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::warn;
use std::collections::HashMap;
use std::time::Duration;

/// Browser-style ceiling on simultaneous requests to one host.
pub const MAX_CONNECTIONS_PER_HOST: usize = 6;

const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_SERVER_WORKERS: usize = 8;
const DEFAULT_START_DATE: &str = "2023-01-01";
const DEFAULT_REQUEST_TIMEOUT_SECS: usize = 120;

pub const ENV_PREFIX: &str = "LAB_";

#[derive(Debug, Clone)]
pub struct LabSettings {
    pub api_base_url: Option<String>,
    pub api_ca_cert: Option<String>,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub server_workers: usize,
    pub start_date: NaiveDate,
    pub request_timeout: Duration,
    pub batch_endpoint: bool,
}

impl Default for LabSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_ca_cert: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: MAX_CONNECTIONS_PER_HOST,
            server_workers: DEFAULT_SERVER_WORKERS,
            start_date: default_start_date(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS as u64),
            batch_endpoint: true,
        }
    }
}

fn default_start_date() -> NaiveDate {
    NaiveDate::parse_from_str(DEFAULT_START_DATE, "%Y-%m-%d").unwrap_or_default()
}

impl LabSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let batch_size = optional_setting_usize(settings, "LAB_BATCH_SIZE", 1)?
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let requested_concurrency =
            optional_setting_usize(settings, "LAB_MAX_CONCURRENT_BATCHES", 1)?
                .unwrap_or(MAX_CONNECTIONS_PER_HOST);
        let max_concurrent_batches = if requested_concurrency > MAX_CONNECTIONS_PER_HOST {
            warn!(
                "LAB_MAX_CONCURRENT_BATCHES={} exceeds the per-host limit, using {}",
                requested_concurrency, MAX_CONNECTIONS_PER_HOST
            );
            MAX_CONNECTIONS_PER_HOST
        } else {
            requested_concurrency
        };
        let server_workers = optional_setting_usize(settings, "LAB_SERVER_WORKERS", 1)?
            .unwrap_or(DEFAULT_SERVER_WORKERS);
        let start_date = if has_setting(settings, "LAB_START_DATE") {
            require_setting_date(settings, "LAB_START_DATE")?
        } else {
            default_start_date()
        };
        let timeout_secs = optional_setting_usize(settings, "LAB_REQUEST_TIMEOUT_SECS", 1)?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let batch_endpoint = optional_setting_bool(settings, "LAB_BATCH_ENDPOINT")?.unwrap_or(true);
        let api_ca_cert = settings
            .get("LAB_API_CA_CERT")
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Ok(Self {
            api_base_url: resolve_api_base_url(settings)?,
            api_ca_cert,
            batch_size,
            max_concurrent_batches,
            server_workers,
            start_date,
            request_timeout: Duration::from_secs(timeout_secs as u64),
            batch_endpoint,
        })
    }

    /// Settings from `LAB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn start_date_string(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }
}

fn has_setting(settings: &HashMap<String, String>, key: &str) -> bool {
    settings
        .get(key)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw = require_setting(settings, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    if !has_setting(settings, key) {
        return Ok(None);
    }
    require_setting_usize(settings, key, min).map(Some)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn optional_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    if !has_setting(settings, key) {
        return Ok(None);
    }
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!(
            "Setting {} must be a boolean (value: {})",
            key,
            raw
        )),
    }
}
