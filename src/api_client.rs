use crate::config::LabSettings;
use crate::error::FetchError;
use crate::fetcher::{fetch_each, BatchRequest, SeriesFetcher};
use crate::models::{BatchOutcome, FetchOutcome, InstrumentSeries};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Certificate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

const BATCH_ENDPOINT: &str = "/analyze-batch-stable";
const SINGLE_ENDPOINT: &str = "/analyze";
const MAX_ERROR_BODY_CHARS: usize = 100;

fn load_ca_certificate(path: Option<&str>) -> Result<Option<Certificate>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let pem = fs::read(path).with_context(|| format!("failed to read CA certificate from {}", path))?;
    let certificate = Certificate::from_pem(&pem)
        .with_context(|| format!("failed to parse CA certificate from {}", path))?;
    Ok(Some(certificate))
}

pub fn build_async_client(timeout: Option<Duration>, ca_cert_path: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificate) = load_ca_certificate(ca_cert_path)? {
        builder = builder.add_root_certificate(certificate);
    }
    builder.build().context("failed to build HTTP client")
}

#[derive(Debug, Serialize)]
struct BatchRequestBody<'a> {
    tickers: &'a [String],
    alpha: f64,
    start_date: &'a str,
    max_workers: usize,
}

#[derive(Debug, Serialize)]
struct SingleRequestBody<'a> {
    ticker: &'a str,
    alpha: f64,
    beta: f64,
    start_date: &'a str,
    use_cache: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SeriesPayload {
    #[serde(default)]
    dates: Vec<String>,
    #[serde(default)]
    prices: Vec<Option<f64>>,
    #[serde(default)]
    stable_slope: Vec<Option<f64>>,
}

impl From<SeriesPayload> for InstrumentSeries {
    fn from(payload: SeriesPayload) -> Self {
        InstrumentSeries::new(payload.dates, payload.prices, payload.stable_slope)
    }
}

#[derive(Debug, Default, Deserialize)]
struct BatchResponseBody {
    #[serde(default)]
    results: HashMap<String, SeriesPayload>,
    #[serde(default)]
    errors: HashMap<String, String>,
}

/// Client for the analysis backend.
pub struct HttpSeriesFetcher {
    client: reqwest::Client,
    base_url: String,
    batch_endpoint: bool,
}

impl HttpSeriesFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, batch_endpoint: bool) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_endpoint,
        }
    }

    pub fn from_settings(settings: &LabSettings) -> Result<Self> {
        let base_url = settings
            .api_base_url
            .clone()
            .ok_or_else(|| {
                anyhow!("LAB_API_BASE_URL must be set unless an offline price file is given with --prices.")
            })?;
        let client = build_async_client(
            Some(settings.request_timeout),
            settings.api_ca_cert.as_deref(),
        )?;
        Ok(Self::new(client, base_url, settings.batch_endpoint))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, FetchError>
    where
        B: Serialize + ?Sized + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("POST {}", url);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| FetchError::Payload(err.to_string()))
    }
}

/// Convert the server's two maps into exactly one outcome per requested symbol.
fn reconcile_batch_response(requested: &[String], body: BatchResponseBody) -> BatchOutcome {
    let BatchResponseBody {
        mut results,
        mut errors,
    } = body;
    let mut outcome = BatchOutcome::with_capacity(requested.len());

    for symbol in requested {
        if let Some(payload) = results.remove(symbol) {
            errors.remove(symbol);
            outcome.insert(symbol.clone(), FetchOutcome::Success(payload.into()));
        } else if let Some(message) = errors.remove(symbol) {
            outcome.insert(symbol.clone(), FetchOutcome::Failure(message));
        } else {
            outcome.insert(
                symbol.clone(),
                FetchOutcome::Failure("missing from batch response".to_string()),
            );
        }
    }

    let unexpected: Vec<_> = results.keys().chain(errors.keys()).cloned().collect();
    if !unexpected.is_empty() {
        warn!(
            "Ignoring {} symbol(s) not part of the request: {}",
            unexpected.len(),
            unexpected.join(",")
        );
    }

    outcome
}

#[async_trait]
impl SeriesFetcher for HttpSeriesFetcher {
    async fn fetch_single(
        &self,
        symbol: &str,
        signal_parameter: f64,
        start_date: &str,
    ) -> Result<InstrumentSeries, FetchError> {
        let body = SingleRequestBody {
            ticker: symbol,
            alpha: signal_parameter,
            beta: 1.0,
            start_date,
            use_cache: false,
        };
        let payload: SeriesPayload = self.post_json(SINGLE_ENDPOINT, &body).await?;
        Ok(payload.into())
    }

    async fn fetch_batch(&self, request: BatchRequest<'_>) -> Result<BatchOutcome, FetchError> {
        if !self.batch_endpoint {
            return fetch_each(self, request).await;
        }

        let body = BatchRequestBody {
            tickers: request.symbols,
            alpha: request.signal_parameter,
            start_date: request.start_date,
            max_workers: request.max_workers,
        };
        let response: BatchResponseBody = self.post_json(BATCH_ENDPOINT, &body).await?;
        Ok(reconcile_batch_response(request.symbols, response))
    }
}
