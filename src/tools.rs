use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::cache::TtlCache;
use crate::catalog::LogFileCatalog;
use crate::config::{Config, LimitsConfig};
use crate::error::{LogEngineError, Result};
use crate::jobs::JobCorrelator;
use crate::model::{
    ClassifiedLogFile, JobExecutionSummary, LogEntry, LogLevel, LogSummary, RawContentChunk,
    SearchResult,
};
use crate::reader::TailedReader;
use crate::search::{EntryFilter, ReadMode, SearchEngine};
use crate::webdav::RemoteStore;

pub const MAX_LIMIT: usize = 1000;
pub const MAX_FETCH_BYTES: u64 = 10_000_000;

/// 工具服务:每个会话一个实例,持有远端句柄与短 TTL 缓存,无全局状态。
pub struct LogToolService {
    store: Arc<dyn RemoteStore>,
    catalog: LogFileCatalog,
    reader: TailedReader,
    engine: SearchEngine,
    jobs: JobCorrelator,
    limits: LimitsConfig,
    cache_enabled: bool,
    list_cache: Mutex<TtlCache<Vec<ClassifiedLogFile>>>,
    summary_cache: Mutex<TtlCache<LogSummary>>,
}

impl LogToolService {
    pub fn new(store: Arc<dyn RemoteStore>, config: &Config) -> Result<Self> {
        let catalog = LogFileCatalog::new(&config.catalog.exclude_globs)?;
        let reader = TailedReader::new(store.clone());
        let engine = SearchEngine::new(reader.clone(), &config.limits);
        let jobs = JobCorrelator::new(engine.clone());
        let ttl = Duration::from_secs(config.cache.ttl_secs);
        Ok(Self {
            store,
            catalog,
            reader,
            engine,
            jobs,
            limits: config.limits.clone(),
            cache_enabled: config.cache.enabled,
            list_cache: Mutex::new(TtlCache::new(ttl, config.cache.capacity)),
            summary_cache: Mutex::new(TtlCache::new(ttl, config.cache.capacity)),
        })
    }

    /// Newest log files, capped to the display limit. Read-through cached.
    pub async fn list_log_files(&self) -> Result<Vec<ClassifiedLogFile>> {
        if self.cache_enabled {
            if let Some(hit) = lock_cache(&self.list_cache).get("list_log_files") {
                debug!("list_log_files served from cache");
                return Ok(hit);
            }
        }
        let files = self
            .with_deadline(async {
                let mut files = self.catalog_snapshot().await?;
                files.truncate(self.limits.display_cap);
                Ok(files)
            })
            .await?;
        if self.cache_enabled {
            lock_cache(&self.list_cache).insert("list_log_files".into(), files.clone());
        }
        Ok(files)
    }

    /// Newest entries of one severity across its standard and custom files.
    pub async fn get_latest_logs(
        &self,
        level: &str,
        limit: Option<usize>,
        date: Option<&str>,
    ) -> Result<Vec<LogEntry>> {
        let level = parse_level(level)?;
        let limit = validate_limit(limit.unwrap_or(self.limits.latest_entries))?;
        let date = parse_date_arg(date)?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            let files = level_files(&catalog, level, date);
            let result =
                self.engine.collect(&files, &EntryFilter::level(level), limit, ReadMode::Tail).await?;
            Ok(result.entries)
        })
        .await
    }

    pub async fn search_logs(
        &self,
        pattern: &str,
        level: Option<&str>,
        limit: Option<usize>,
        date: Option<&str>,
    ) -> Result<SearchResult> {
        validate_pattern(pattern)?;
        let level = parse_level_filter(level)?;
        let limit = validate_limit(limit.unwrap_or(self.limits.search_results))?;
        let date = parse_date_arg(date)?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            let files: Vec<ClassifiedLogFile> = match level {
                Some(level) => level_files(&catalog, level, date),
                None => catalog
                    .into_iter()
                    .filter(|f| !f.kind.is_job() && date.map_or(true, |d| f.date == d))
                    .collect(),
            };
            self.engine.search(&files, pattern, level, limit).await
        })
        .await
    }

    /// Raw bytes of one named file, tail-first. The filename never leaves
    /// the log folder: traversal shapes are rejected before any remote call.
    pub async fn get_log_file_contents(
        &self,
        filename: &str,
        max_bytes: Option<u64>,
        tail_only: Option<bool>,
    ) -> Result<RawContentChunk> {
        validate_filename(filename)?;
        let max_bytes = validate_max_bytes(max_bytes.unwrap_or(self.limits.tail_bytes))?;
        let tail_only = tail_only.unwrap_or(true);
        self.with_deadline(async {
            let descriptors = self.store.list_directory().await?;
            let Some(descriptor) = descriptors.into_iter().find(|d| d.name == filename) else {
                return Err(LogEngineError::NotFound(filename.to_string()));
            };
            self.reader.read_descriptor(&descriptor, max_bytes, tail_only).await
        })
        .await
    }

    /// Daily health summary over standard and custom logs. Without an
    /// explicit date the newest cataloged date is summarized. Cached.
    pub async fn summarize_logs(&self, date: Option<&str>) -> Result<LogSummary> {
        let requested = parse_date_arg(date)?;
        let cache_key = format!(
            "summarize_logs:{}",
            requested.map_or_else(|| "latest".to_string(), |d| d.to_string())
        );
        if self.cache_enabled {
            if let Some(hit) = lock_cache(&self.summary_cache).get(&cache_key) {
                debug!("summarize_logs served from cache");
                return Ok(hit);
            }
        }
        let summary = self
            .with_deadline(async {
                let catalog = self.catalog_snapshot().await?;
                let date = match requested {
                    Some(d) => d,
                    None => catalog
                        .iter()
                        .map(|f| f.date)
                        .max()
                        .unwrap_or_else(|| Utc::now().date_naive()),
                };
                let files: Vec<ClassifiedLogFile> = catalog
                    .into_iter()
                    .filter(|f| f.date == date && !f.kind.is_job())
                    .collect();
                self.engine.summarize(date, &files).await
            })
            .await?;
        if self.cache_enabled {
            lock_cache(&self.summary_cache).insert(cache_key, summary.clone());
        }
        Ok(summary)
    }

    pub async fn get_latest_job_log_files(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<ClassifiedLogFile>> {
        let limit = validate_limit(limit.unwrap_or(self.limits.job_files))?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            Ok(self.jobs.latest_files(&catalog, limit))
        })
        .await
    }

    pub async fn search_job_logs_by_name(
        &self,
        job_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ClassifiedLogFile>> {
        validate_job_name(job_name)?;
        let limit = validate_limit(limit.unwrap_or(self.limits.job_files))?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            Ok(self.jobs.files_by_name(&catalog, job_name, limit))
        })
        .await
    }

    pub async fn get_job_log_entries(
        &self,
        job_name: &str,
        level: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<LogEntry>> {
        validate_job_name(job_name)?;
        let level = parse_level_filter(level)?;
        let limit = validate_limit(limit.unwrap_or(self.limits.job_entries))?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            self.jobs.entries(&catalog, job_name, level, limit).await
        })
        .await
    }

    pub async fn search_job_logs(
        &self,
        job_name: &str,
        pattern: &str,
        level: Option<&str>,
        limit: Option<usize>,
    ) -> Result<SearchResult> {
        validate_job_name(job_name)?;
        validate_pattern(pattern)?;
        let level = parse_level_filter(level)?;
        let limit = validate_limit(limit.unwrap_or(self.limits.job_search_results))?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            self.jobs.search(&catalog, job_name, pattern, level, limit).await
        })
        .await
    }

    pub async fn get_job_execution_summary(&self, job_name: &str) -> Result<JobExecutionSummary> {
        validate_job_name(job_name)?;
        self.with_deadline(async {
            let catalog = self.catalog_snapshot().await?;
            self.jobs.execution_summary(&catalog, job_name).await
        })
        .await
    }

    async fn catalog_snapshot(&self) -> Result<Vec<ClassifiedLogFile>> {
        let descriptors = self.store.list_directory().await?;
        Ok(self.catalog.classify(descriptors))
    }

    /// One deadline around the whole operation. A timeout yields an error,
    /// never partial results.
    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let ms = self.limits.operation_timeout_ms;
        if ms == 0 {
            return fut.await;
        }
        match tokio::time::timeout(Duration::from_millis(ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(LogEngineError::Timeout(ms)),
        }
    }
}

fn lock_cache<V>(cache: &Mutex<TtlCache<V>>) -> std::sync::MutexGuard<'_, TtlCache<V>> {
    // Cache contents are rederivable, so a poisoned lock is still usable.
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn level_files(
    catalog: &[ClassifiedLogFile],
    level: LogLevel,
    date: Option<NaiveDate>,
) -> Vec<ClassifiedLogFile> {
    catalog
        .iter()
        .filter(|f| f.kind.level() == Some(level) && date.map_or(true, |d| f.date == d))
        .cloned()
        .collect()
}

pub(crate) fn validate_limit(limit: usize) -> Result<usize> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(LogEngineError::Validation(format!(
            "limit must be within 1..={MAX_LIMIT}, got {limit}"
        )))
    }
}

pub(crate) fn validate_max_bytes(max_bytes: u64) -> Result<u64> {
    if (1..=MAX_FETCH_BYTES).contains(&max_bytes) {
        Ok(max_bytes)
    } else {
        Err(LogEngineError::Validation(format!(
            "max_bytes must be within 1..={MAX_FETCH_BYTES}, got {max_bytes}"
        )))
    }
}

/// Filenames stay inside the log folder. Interior slashes are legitimate
/// (job logs live in subfolders); parent hops and absolute paths are not.
pub(crate) fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(LogEngineError::Validation("filename must not be empty".into()));
    }
    if filename.contains("..") || filename.contains('\\') || filename.starts_with('/') {
        return Err(LogEngineError::Validation(format!(
            "filename must not traverse outside the log folder: {filename}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_job_name(job_name: &str) -> Result<()> {
    if job_name.trim().is_empty() {
        return Err(LogEngineError::Validation("job_name must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(LogEngineError::Validation("pattern must not be empty".into()));
    }
    Ok(())
}

fn parse_level(level: &str) -> Result<LogLevel> {
    LogLevel::parse(level).ok_or_else(|| {
        LogEngineError::Validation(format!(
            "level must be one of error, warn, info, debug; got '{level}'"
        ))
    })
}

/// Absent and "all" both mean no level restriction.
fn parse_level_filter(level: Option<&str>) -> Result<Option<LogLevel>> {
    match level {
        None => Ok(None),
        Some("all") => Ok(None),
        Some(s) => parse_level(s).map(Some),
    }
}

fn parse_date_arg(date: Option<&str>) -> Result<Option<NaiveDate>> {
    let Some(s) = date else { return Ok(None) };
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
            return Ok(Some(d));
        }
    }
    Err(LogEngineError::Validation(format!("date must be YYYYMMDD, got '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_accept_the_documented_range() {
        assert_eq!(validate_limit(1).unwrap(), 1);
        assert_eq!(validate_limit(1000).unwrap(), 1000);
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1001).is_err());
    }

    #[test]
    fn max_bytes_accept_the_documented_range() {
        assert_eq!(validate_max_bytes(1).unwrap(), 1);
        assert_eq!(validate_max_bytes(10_000_000).unwrap(), 10_000_000);
        assert!(validate_max_bytes(0).is_err());
        assert!(validate_max_bytes(10_000_001).is_err());
    }

    #[test]
    fn traversal_shapes_are_rejected() {
        assert!(validate_filename("error-blade1-20240101.log").is_ok());
        assert!(validate_filename("jobs/ImportCatalog/Job-ImportCatalog-20240101-010000.log").is_ok());
        assert!(validate_filename("../../../etc/passwd").is_err());
        assert!(validate_filename("logs\\..\\secret").is_err());
        assert!(validate_filename("/etc/passwd").is_err());
        assert!(validate_filename("a/../b.log").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn level_filters_parse_with_all_as_no_restriction() {
        assert_eq!(parse_level_filter(None).unwrap(), None);
        assert_eq!(parse_level_filter(Some("all")).unwrap(), None);
        assert_eq!(parse_level_filter(Some("warn")).unwrap(), Some(LogLevel::Warn));
        assert!(parse_level_filter(Some("fatal")).is_err());
        assert!(parse_level("ALL").is_err());
    }

    #[test]
    fn dates_parse_strictly_as_yyyymmdd() {
        assert_eq!(
            parse_date_arg(Some("20240101")).unwrap(),
            Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(parse_date_arg(None).unwrap(), None);
        assert!(parse_date_arg(Some("2024-01-01")).is_err());
        assert!(parse_date_arg(Some("20241399")).is_err());
        assert!(parse_date_arg(Some("0101")).is_err());
    }
}
