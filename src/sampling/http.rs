use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CellSample, CellSampler, CellSamples, Layer, SamplerError};
use crate::config::SamplerConfig;
use crate::spatial::CellId;

/// HTTP client for the cell sampling service.
///
/// Large cell sets are split into `batch_size` chunks that are sent
/// concurrently. A chunk that still fails after retries only loses its own
/// cells; the call fails when no chunk succeeds.
#[derive(Clone)]
pub struct HttpCellSampler {
    client: ClientWithMiddleware,
    endpoint: String,
    batch_size: usize,
    max_concurrent_batches: usize,
}

impl HttpCellSampler {
    pub fn new(cfg: &SamplerConfig) -> Result<Self> {
        let endpoint = format!("{}/v1/cells/sample", cfg.base_url.trim_end_matches('/'));
        reqwest::Url::parse(&endpoint).with_context(|| format!("invalid sampler url {endpoint}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("stormwater-network/0.1"),
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .default_headers(headers)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(100), Duration::from_secs(5))
            .build_with_max_retries(cfg.max_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            endpoint,
            batch_size: cfg.batch_size.max(1),
            max_concurrent_batches: cfg.max_concurrent_batches.max(1),
        })
    }

    async fn fetch_batch(&self, cells: &[CellId], layers: &[Layer]) -> Result<CellSamples, SamplerError> {
        let request = SampleRequest {
            cells: cells.iter().map(ToString::to_string).collect(),
            layers,
        };
        let body = serde_json::to_vec(&request)?;

        debug!(endpoint = %self.endpoint, cells = cells.len(), "sampling batch");
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(SamplerError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: SampleResponse = serde_json::from_str(&text)?;
        let mut samples = CellSamples::with_capacity(parsed.cells.len());
        for (raw_id, values) in parsed.cells {
            match raw_id.parse::<CellId>() {
                Ok(cell) => {
                    samples.insert(cell, CellSample::from_json(&values));
                }
                Err(_) => debug!(cell = %raw_id, "ignoring unknown cell id in sampler response"),
            }
        }
        Ok(samples)
    }
}

#[async_trait]
impl CellSampler for HttpCellSampler {
    async fn fetch(&self, cells: &[CellId], layers: &[Layer]) -> Result<CellSamples, SamplerError> {
        if cells.is_empty() || layers.is_empty() {
            return Ok(CellSamples::new());
        }

        let results: Vec<_> = stream::iter(cells.chunks(self.batch_size))
            .map(|chunk| self.fetch_batch(chunk, layers))
            .buffer_unordered(self.max_concurrent_batches)
            .boxed()
            .collect()
            .await;

        let batches = results.len();
        let mut merged = CellSamples::with_capacity(cells.len());
        let mut first_error = None;
        let mut failed = 0;
        for result in results {
            match result {
                Ok(samples) => merged.extend(samples),
                Err(e) => {
                    warn!(error = %e, "sampler batch failed");
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) if failed == batches => Err(e),
            _ => Ok(merged),
        }
    }
}

#[derive(Debug, Serialize)]
struct SampleRequest<'a> {
    cells: Vec<String>,
    layers: &'a [Layer],
}

#[derive(Debug, Deserialize)]
struct SampleResponse {
    #[serde(default)]
    cells: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}
