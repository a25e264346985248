//! Client for the data broker's HTTP API.
//!
//! The broker aggregates clinical-encounter results across contributing
//! nodes and hands them out as downloadable bundles. Requests are selected
//! by tag rather than by hardcoded id: the highest id carrying the
//! configured tag is the current reporting request.

mod xml;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, header};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("broker returned HTTP {status} during {context}")]
    Http { status: StatusCode, context: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed broker response: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Media type of broker query requests, used as the listing filter.
const REQUEST_MEDIA_TYPE: &str = "application/vnd.aktin.query.request+xml";

/// Broker operations the pipeline depends on. The production implementation
/// is [`BrokerClient`]; tests substitute mocks.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Lightweight reachability probe. Any failure is fatal for the run.
    async fn check_availability(&self) -> Result<(), BrokerError>;

    /// Highest request id carrying `tag`, or `None` when no request does.
    /// An empty result is a benign "nothing to do", not an error.
    async fn latest_request_id(&self, tag: &str) -> Result<Option<u32>, BrokerError>;

    /// Aggregate the request's results server-side, then download the
    /// bundle to `target_dir/result{id}.zip`. On failure no file is left
    /// behind at the target path.
    async fn export_and_download(
        &self,
        request_id: u32,
        target_dir: &Path,
    ) -> Result<PathBuf, BrokerError>;

    /// Completion ratio (finished nodes / total nodes) for every request
    /// currently carrying `tag`.
    async fn completion_ratios(&self, tag: &str) -> Result<BTreeMap<u32, f64>, BrokerError>;
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct BrokerClient {
    http: reqwest::Client,
    settings: BrokerSettings,
}

impl BrokerClient {
    pub fn new(settings: BrokerSettings) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    fn endpoint(&self, parts: &[&str]) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let mut url = String::from(base);
        for part in parts {
            url.push('/');
            url.push_str(part);
        }
        url
    }

    async fn get_text(&self, url: String, context: &str) -> Result<String, BrokerError> {
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.settings.api_key)
            .header(header::ACCEPT, "application/xml")
            .send()
            .await?;
        Self::ensure_success(&response, context)?;
        Ok(response.text().await?)
    }

    fn ensure_success(response: &Response, context: &str) -> Result<(), BrokerError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BrokerError::Http {
                status,
                context: context.to_string(),
            })
        }
    }

    async fn request_ids(&self, tag: &str) -> Result<Vec<u32>, BrokerError> {
        let url = self.endpoint(&["broker", "request", "filtered"]);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("type", REQUEST_MEDIA_TYPE),
                ("predicate", &format!("//tag='{tag}'")),
            ])
            .bearer_auth(&self.settings.api_key)
            .header(header::ACCEPT, "application/xml")
            .send()
            .await?;
        Self::ensure_success(&response, "request listing")?;
        xml::parse_request_ids(&response.text().await?)
    }

    async fn completion_ratio(&self, request_id: u32) -> Result<f64, BrokerError> {
        let url = self.endpoint(&["broker", "request", &request_id.to_string(), "status"]);
        let body = self.get_text(url, "request status").await?;
        let (completed, total) = xml::parse_node_completion(&body)?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(f64::from(completed) / f64::from(total))
    }
}

#[async_trait]
impl BrokerApi for BrokerClient {
    async fn check_availability(&self) -> Result<(), BrokerError> {
        let url = self.endpoint(&["broker", "status"]);
        let response = self
            .http
            .head(&url)
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BrokerError::Unreachable("connection to broker timed out".to_string())
                } else {
                    BrokerError::Unreachable(err.to_string())
                }
            })?;
        Self::ensure_success(&response, "availability check")
    }

    async fn latest_request_id(&self, tag: &str) -> Result<Option<u32>, BrokerError> {
        let ids = self.request_ids(tag).await?;
        let Some(latest) = ids.iter().max().copied() else {
            return Ok(None);
        };
        info!(count = ids.len(), latest, tag, "tagged requests found");
        Ok(Some(latest))
    }

    async fn export_and_download(
        &self,
        request_id: u32,
        target_dir: &Path,
    ) -> Result<PathBuf, BrokerError> {
        info!(request_id, "exporting request results");
        let url = self.endpoint(&["broker", "export", "request-bundle", &request_id.to_string()]);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .header(header::ACCEPT, "text/plain")
            .send()
            .await?;
        Self::ensure_success(&response, "result export")?;
        // Single-use token; must never be cached across runs.
        let token = response.text().await?.trim().to_string();

        info!(token, "downloading exported bundle");
        let url = self.endpoint(&["broker", "download", &token]);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.settings.api_key)
            .send()
            .await?;
        Self::ensure_success(&response, "result download")?;
        // Buffer the full body before touching the filesystem so a failed
        // transfer cannot leave a partial archive at the target path.
        let bytes = response.bytes().await?;

        let archive_path = target_dir.join(format!("result{request_id}.zip"));
        info!(path = %archive_path.display(), "writing result archive");
        tokio::fs::write(&archive_path, &bytes).await?;
        Ok(archive_path)
    }

    async fn completion_ratios(&self, tag: &str) -> Result<BTreeMap<u32, f64>, BrokerError> {
        let mut ratios = BTreeMap::new();
        for id in self.request_ids(tag).await? {
            ratios.insert(id, self.completion_ratio(id).await?);
        }
        Ok(ratios)
    }
}
