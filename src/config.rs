use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LogEngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::default(),
            http_addr: default_http_addr(),
            http_port: default_http_port(),
        }
    }
}

/// 远端 WebDAV 访问参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Instance base URL, e.g. `https://dev01-shop.example.com`.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Path of the log collection under the base URL.
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            log_path: default_log_path(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Per-operation-class result caps and read ceilings. Every knob has a
/// default so a minimal config file only names the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Files shown by a directory listing.
    #[serde(default = "default_display_cap")]
    pub display_cap: usize,
    /// Entries returned by a latest-logs read.
    #[serde(default = "default_latest_entries")]
    pub latest_entries: usize,
    /// Entries returned by a search.
    #[serde(default = "default_search_results")]
    pub search_results: usize,
    /// Job log files returned by job file listings.
    #[serde(default = "default_job_files")]
    pub job_files: usize,
    /// Entries returned by a job entries read.
    #[serde(default = "default_job_entries")]
    pub job_entries: usize,
    /// Entries returned by a job-scoped search.
    #[serde(default = "default_job_search_results")]
    pub job_search_results: usize,
    /// Suffix window for tail reads.
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u64,
    /// Ceiling for whole-file reads during summaries and job correlation.
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
    /// Files read concurrently during multi-file scans.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Whole-operation deadline; 0 disables it.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Distinct key issues kept per summary.
    #[serde(default = "default_key_issue_cap")]
    pub key_issue_cap: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            display_cap: default_display_cap(),
            latest_entries: default_latest_entries(),
            search_results: default_search_results(),
            job_files: default_job_files(),
            job_entries: default_job_entries(),
            job_search_results: default_job_search_results(),
            tail_bytes: default_tail_bytes(),
            max_fetch_bytes: default_max_fetch_bytes(),
            max_concurrent_files: default_max_concurrent_files(),
            operation_timeout_ms: default_operation_timeout_ms(),
            key_issue_cap: default_key_issue_cap(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Filenames matching any of these globs are dropped during cataloging.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// 按扩展名选择 YAML 或 JSON 解析。
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LogEngineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&raw).map_err(|e| {
                LogEngineError::Config(format!("invalid yaml in {}: {e}", path.display()))
            }),
            "json" => serde_json::from_str(&raw).map_err(|e| {
                LogEngineError::Config(format!("invalid json in {}: {e}", path.display()))
            }),
            other => Err(LogEngineError::Config(format!(
                "unsupported config extension '{other}', expected yaml or json"
            ))),
        }
    }
}

fn default_http_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_path() -> String {
    "/on/demandware.servlet/webdav/Sites/Logs".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_display_cap() -> usize {
    50
}

fn default_latest_entries() -> usize {
    10
}

fn default_search_results() -> usize {
    20
}

fn default_job_files() -> usize {
    10
}

fn default_job_entries() -> usize {
    50
}

fn default_job_search_results() -> usize {
    10
}

fn default_tail_bytes() -> u64 {
    200 * 1024
}

fn default_max_fetch_bytes() -> u64 {
    1024 * 1024
}

fn default_max_concurrent_files() -> usize {
    6
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_key_issue_cap() -> usize {
    10
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    15
}

fn default_cache_capacity() -> usize {
    64
}
