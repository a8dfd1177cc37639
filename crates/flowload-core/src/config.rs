//! Harness configuration
//!
//! Loaded from a YAML file with environment-variable substitution on top
//! (`.env` files are honored via dotenvy). When no file is found a fallback
//! configuration is assembled purely from the environment so the harness can
//! run in containerized setups without mounting a config file.

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default flow creation endpoint on the ETL service.
pub const DEFAULT_FLOW_ENDPOINT: &str = "/etl/api/v1/flow/";

/// Default chunk size for file splitting (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default number of attempts for a single request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retry attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default total completed-iteration budget across all sessions.
pub const DEFAULT_MAX_ITERATIONS: u64 = 1;

/// Default wait budget for small uploads (seconds).
pub const DEFAULT_TIMEOUT_SMALL_SECS: u64 = 300;

/// Default wait budget for large uploads (seconds).
pub const DEFAULT_TIMEOUT_LARGE_SECS: u64 = 3600;

/// Chunk count above which the large wait budget applies.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 200;

/// Default interval between status polls (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default wait budget for process-metrics runs (seconds).
pub const DEFAULT_PM_TIMEOUT_SECS: u64 = 1800;

/// Default naming prefix of per-tenant backing databases.
pub const DEFAULT_DATABASE_PREFIX: &str = "ProcessMiningDB_";

/// One credential set from the user pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default = "default_flow_endpoint")]
    pub flow_endpoint: String,
}

fn default_flow_endpoint() -> String {
    DEFAULT_FLOW_ENDPOINT.to_string()
}

/// Upload and polling control knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadControl {
    #[serde(default = "default_timeout_small")]
    pub timeout_small_secs: u64,
    #[serde(default = "default_timeout_large")]
    pub timeout_large_secs: u64,
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_pm_timeout")]
    pub pm_timeout_secs: u64,
}

fn default_timeout_small() -> u64 {
    DEFAULT_TIMEOUT_SMALL_SECS
}
fn default_timeout_large() -> u64 {
    DEFAULT_TIMEOUT_LARGE_SECS
}
fn default_chunk_threshold() -> u64 {
    DEFAULT_CHUNK_THRESHOLD
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_pm_timeout() -> u64 {
    DEFAULT_PM_TIMEOUT_SECS
}

impl Default for UploadControl {
    fn default() -> Self {
        Self {
            timeout_small_secs: DEFAULT_TIMEOUT_SMALL_SECS,
            timeout_large_secs: DEFAULT_TIMEOUT_LARGE_SECS,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            pm_timeout_secs: DEFAULT_PM_TIMEOUT_SECS,
        }
    }
}

/// Policy for chunks that fail all their upload attempts
///
/// `BestEffort` matches the historical behavior: a dead chunk is logged and
/// the remaining chunks still go up, so the server may receive fewer chunks
/// than announced. `FailFast` aborts the flow on the first dead chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailureMode {
    #[default]
    BestEffort,
    FailFast,
}

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub api: ApiSettings,
    pub users: Vec<Credentials>,
    pub csv_file_path: PathBuf,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    #[serde(default)]
    pub upload: UploadControl,
    #[serde(default)]
    pub chunk_failure_mode: ChunkFailureMode,

    #[serde(default = "default_database_prefix")]
    pub database_prefix: String,

    #[serde(default = "default_true")]
    pub validate_row_count: bool,
    #[serde(default)]
    pub process_metrics: bool,
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_max_iterations() -> u64 {
    DEFAULT_MAX_ITERATIONS
}
fn default_true() -> bool {
    true
}
fn default_database_prefix() -> String {
    DEFAULT_DATABASE_PREFIX.to_string()
}

impl LoadConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    ///
    /// With no explicit path, `CONFIG_PATH` is consulted; if nothing points
    /// at an existing file, a fallback configuration is built from the
    /// environment alone.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let resolved = path
            .map(PathBuf::from)
            .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));

        let mut config = match resolved {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| FlowError::config(format!("invalid config {}: {e}", p.display())))?
            },
            Some(p) => {
                return Err(FlowError::config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            },
            None => Self::fallback()?,
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration purely from environment variables
    ///
    /// Credentials come from `USER<n>_USERNAME` / `USER<n>_PASSWORD` pairs,
    /// counted up from 1 until the first gap.
    pub fn fallback() -> Result<Self> {
        let mut users = Vec::new();
        for n in 1.. {
            let (Ok(username), Ok(password)) = (
                std::env::var(format!("USER{n}_USERNAME")),
                std::env::var(format!("USER{n}_PASSWORD")),
            ) else {
                break;
            };
            users.push(Credentials { username, password });
        }

        Ok(Self {
            api: ApiSettings {
                base_url: std::env::var("BASE_URL").unwrap_or_default(),
                flow_endpoint: DEFAULT_FLOW_ENDPOINT.to_string(),
            },
            users,
            csv_file_path: PathBuf::from(std::env::var("CSV_FILE_PATH").unwrap_or_default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            upload: UploadControl::default(),
            chunk_failure_mode: ChunkFailureMode::default(),
            database_prefix: DEFAULT_DATABASE_PREFIX.to_string(),
            validate_row_count: true,
            process_metrics: false,
            insecure_tls: false,
        })
    }

    /// Apply environment-variable overrides on top of the loaded file
    ///
    /// `BASE_URL`, `MAX_ITERATIONS`, and `CSV_FILE_PATH` replace their file
    /// counterparts outright. `PASSWORD` is substituted for any credential
    /// whose password is the sentinel value `FROM_ENV`.
    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("BASE_URL") {
            self.api.base_url = base_url;
        }

        if let Ok(raw) = std::env::var("MAX_ITERATIONS") {
            match raw.parse() {
                Ok(n) => self.max_iterations = n,
                Err(_) => {
                    tracing::warn!(value = %raw, "MAX_ITERATIONS is not an integer, keeping {}", self.max_iterations);
                },
            }
        }

        if let Ok(path) = std::env::var("CSV_FILE_PATH") {
            self.csv_file_path = PathBuf::from(path);
        }

        if let Ok(password) = std::env::var("PASSWORD") {
            for user in &mut self.users {
                if user.password == "FROM_ENV" {
                    user.password = password.clone();
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(FlowError::config("api.base_url is empty"));
        }
        if self.users.is_empty() {
            return Err(FlowError::config("no credentials configured"));
        }
        if self.max_retries == 0 {
            return Err(FlowError::config("max_retries must be at least 1"));
        }
        Ok(())
    }

    /// Base delay between retry attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Wait budget for an upload of `total_chunks` chunks
    ///
    /// Large uploads (above the chunk threshold) get the long budget.
    pub fn upload_timeout(&self, total_chunks: u64) -> Duration {
        if total_chunks > self.upload.chunk_threshold {
            Duration::from_secs(self.upload.timeout_large_secs)
        } else {
            Duration::from_secs(self.upload.timeout_small_secs)
        }
    }

    /// Interval between status polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.upload.poll_interval_secs)
    }

    /// Wait budget for a process-metrics run
    pub fn pm_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.pm_timeout_secs)
    }
}
