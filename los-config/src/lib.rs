//! Validated configuration for the LOS reporting pipeline.
//!
//! The pipeline is configured through a single TOML file. Loading validates
//! the full set of required keys up front so a broken deployment reports
//! every absent key at once instead of failing on the first one, then
//! deserializes into typed sections that are threaded through the component
//! constructors.

mod error;

use std::{fs::read_to_string, path::Path, path::PathBuf};

use serde::Deserialize;
use tracing::info;

pub use error::ConfigError;

/// Keys that must be present in the configuration file. Optional settings
/// (clinic numbers, result zipping, status tracking, upload encryption) are
/// deliberately absent from this list.
const REQUIRED_KEYS: &[&str] = &[
    "broker.url",
    "broker.api_key",
    "requests.tag",
    "sftp.host",
    "sftp.port",
    "sftp.username",
    "sftp.password",
    "sftp.timeout_secs",
    "sftp.folder",
    "rscript.script_path",
    "rscript.los_max",
    "rscript.error_max",
    "pipeline.working_dir",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerSection,
    pub requests: RequestsSection,
    pub sftp: SftpSection,
    pub rscript: RscriptSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestsSection {
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SftpSection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub folder: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RscriptSection {
    pub script_path: PathBuf,
    pub los_max: u32,
    pub error_max: f64,
    /// Clinic numbers in range syntax, e.g. `"1-5,7,9-10"`.
    pub clinic_nums: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    pub working_dir: PathBuf,
    /// Wrap the renamed result into a single-entry zip before publishing.
    #[serde(default)]
    pub zip_result: bool,
    /// Enables the status reconciliation stage when set.
    pub status_file: Option<PathBuf>,
    /// Base64-encoded AES-256 key; enables encryption of uploads when set.
    pub encryption_key: Option<String>,
}

impl Config {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "loading configuration");
        let raw = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let value: toml::Value = toml::from_str(&raw)?;
        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| lookup(&value, key).is_none())
            .map(|key| (*key).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys { keys: missing });
        }

        let config: Config = toml::from_str(&raw)?;
        // Surface a malformed clinic range at load time, not mid-run.
        config.rscript.clinic_numbers()?;
        Ok(config)
    }
}

impl RscriptSection {
    /// Expand the configured clinic range syntax into explicit numbers.
    ///
    /// `"1-5,7,9-10"` becomes `[1, 2, 3, 4, 5, 7, 9, 10]`. Returns `None`
    /// when no clinic numbers are configured.
    pub fn clinic_numbers(&self) -> Result<Option<Vec<u32>>, ConfigError> {
        let Some(spec) = self.clinic_nums.as_deref() else {
            return Ok(None);
        };
        let invalid = || ConfigError::InvalidClinicRange(spec.to_string());

        let mut numbers = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo.trim().parse().map_err(|_| invalid())?;
                let hi: u32 = hi.trim().parse().map_err(|_| invalid())?;
                if lo > hi {
                    return Err(invalid());
                }
                numbers.extend(lo..=hi);
            } else {
                numbers.push(part.parse().map_err(|_| invalid())?);
            }
        }
        if numbers.is_empty() {
            return Err(invalid());
        }
        Ok(Some(numbers))
    }
}

fn lookup<'a>(value: &'a toml::Value, path: &str) -> Option<&'a toml::Value> {
    path.split('.')
        .try_fold(value, |current, key| current.as_table()?.get(key))
}
