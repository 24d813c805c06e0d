use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use reqwest::header::RANGE;
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{LogEngineError, Result};
use crate::model::RemoteFileDescriptor;

/// 远端目录的最小访问面:一次列表,两种取字节方式。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Immediate children of the log folder.
    async fn list_directory(&self) -> Result<Vec<RemoteFileDescriptor>>;

    /// Trailing `suffix_len` bytes of a file. Servers that ignore suffix
    /// ranges still yield exactly those bytes to the caller.
    async fn fetch_range(&self, file_name: &str, suffix_len: u64) -> Result<Vec<u8>>;

    async fn fetch_full(&self, file_name: &str) -> Result<Vec<u8>>;
}

/// WebDAV client for the platform's log folder.
#[derive(Debug)]
pub struct WebDavClient {
    base_url: String,
    log_path: String,
    username: String,
    password: String,
    client: Client,
}

impl WebDavClient {
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        if cfg.base_url.is_empty() {
            return Err(LogEngineError::Config("remote.base_url is required".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| LogEngineError::Config(format!("http client: {e}")))?;
        let mut log_path = cfg.log_path.trim_end_matches('/').to_string();
        if !log_path.starts_with('/') {
            log_path.insert(0, '/');
        }
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            log_path,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            client,
        })
    }

    fn folder_url(&self) -> String {
        format!("{}{}/", self.base_url, self.log_path)
    }

    fn file_url(&self, file_name: &str) -> String {
        // Encode per segment; job logs sit in subfolders of the log root.
        let encoded: Vec<String> = file_name
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect();
        format!("{}{}/{}", self.base_url, self.log_path, encoded.join("/"))
    }

    fn status_error(&self, status: StatusCode, what: &str) -> LogEngineError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LogEngineError::Auth(format!(
                "remote rejected credentials ({status}) for {what}"
            )),
            StatusCode::NOT_FOUND => LogEngineError::NotFound(what.to_string()),
            s => LogEngineError::Connection(format!("remote returned HTTP {s} for {what}")),
        }
    }
}

#[async_trait]
impl RemoteStore for WebDavClient {
    async fn list_directory(&self) -> Result<Vec<RemoteFileDescriptor>> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| LogEngineError::Config(format!("PROPFIND method: {e}")))?;
        let resp = self
            .client
            .request(method, self.folder_url())
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "1")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(self.status_error(status, "log directory listing"));
        }
        let body = resp.text().await?;
        let files = parse_multistatus(&body, &self.log_path);
        debug!(count = files.len(), "listed remote log directory");
        Ok(files)
    }

    async fn fetch_range(&self, file_name: &str, suffix_len: u64) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(self.file_url(file_name))
            .basic_auth(&self.username, Some(&self.password))
            .header(RANGE, format!("bytes=-{suffix_len}"))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // Some WebDAV frontends refuse suffix ranges outright.
            debug!(file = file_name, "suffix range refused, falling back to full fetch");
            return self.fetch_full(file_name).await;
        }
        if !status.is_success() {
            return Err(self.status_error(status, file_name));
        }
        let got_whole = status != StatusCode::PARTIAL_CONTENT;
        let bytes = resp.bytes().await?.to_vec();
        if got_whole {
            // Range header ignored; keep the contract by slicing ourselves.
            return Ok(suffix_of(bytes, suffix_len));
        }
        Ok(bytes)
    }

    async fn fetch_full(&self, file_name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(self.file_url(file_name))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(self.status_error(status, file_name));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Tail of `bytes` when a server ignored the suffix range and sent the whole
/// body. Bodies already within the window pass through untouched.
fn suffix_of(bytes: Vec<u8>, suffix_len: u64) -> Vec<u8> {
    if bytes.len() as u64 > suffix_len {
        let start = bytes.len() - suffix_len as usize;
        bytes[start..].to_vec()
    } else {
        bytes
    }
}

fn response_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(?:[a-z0-9]+:)?response[\s>].*?</(?:[a-z0-9]+:)?response>").unwrap()
    })
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(?:[a-z0-9]+:)?href>([^<]+)</").unwrap())
}

fn collection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(?:[a-z0-9]+:)?collection\s*/?>").unwrap())
}

fn length_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(?:[a-z0-9]+:)?getcontentlength[^>]*>(\d+)<").unwrap())
}

fn modified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(?:[a-z0-9]+:)?getlastmodified[^>]*>([^<]+)<").unwrap())
}

/// 解析 207 多状态响应。宽松匹配命名空间前缀,不依赖完整 XML 解析。
fn parse_multistatus(body: &str, log_path: &str) -> Vec<RemoteFileDescriptor> {
    let mut files = Vec::new();
    for block in response_block_re().find_iter(body) {
        let block = block.as_str();
        if collection_re().is_match(block) {
            continue;
        }
        let Some(href) = href_re().captures(block).map(|c| c[1].trim().to_string()) else {
            continue;
        };
        let Some(name) = file_name_from_href(&href, log_path) else {
            continue;
        };
        let size_bytes = length_re()
            .captures(block)
            .and_then(|c| c[1].parse::<u64>().ok())
            .unwrap_or(0);
        let last_modified = modified_re()
            .captures(block)
            .and_then(|c| parse_http_date(c[1].trim()))
            .unwrap_or_else(epoch);
        files.push(RemoteFileDescriptor { name, size_bytes, last_modified });
    }
    files
}

/// Strip scheme, host and the log collection prefix off an href, leaving the
/// decoded name relative to the log folder.
fn file_name_from_href(href: &str, log_path: &str) -> Option<String> {
    let mut path = href;
    if let Some(scheme_end) = path.find("://") {
        let after = &path[scheme_end + 3..];
        path = after.find('/').map(|i| &after[i..])?;
    }
    let decoded = urlencoding::decode(path)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let rel = decoded.strip_prefix(log_path)?;
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        // The folder itself.
        return None;
    }
    Some(rel.to_string())
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}
