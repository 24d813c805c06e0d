use chrono::{Datelike, NaiveDate};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::error::{LogEngineError, Result};
use crate::model::{ClassifiedLogFile, LogFileKind, LogLevel, RemoteFileDescriptor};

/// 文件目录:按命名约定把远端目录条目归类为日志文件。
#[derive(Debug, Clone, Default)]
pub struct LogFileCatalog {
    exclude: GlobSet,
}

/// Keeps the date component strictly above any discovery ordinal.
const ORDINAL_SPAN: i64 = 1_000_000;

impl LogFileCatalog {
    pub fn new(exclude_globs: &[String]) -> Result<Self> {
        Ok(Self { exclude: build_globset(exclude_globs)? })
    }

    /// Classify raw directory entries into typed log files, newest first.
    /// Unrecognized names are dropped, never errored on.
    pub fn classify(&self, descriptors: Vec<RemoteFileDescriptor>) -> Vec<ClassifiedLogFile> {
        let mut files = Vec::with_capacity(descriptors.len());
        for (ordinal, descriptor) in descriptors.into_iter().enumerate() {
            if !self.exclude.is_empty() && self.exclude.is_match(&descriptor.name) {
                debug!(name = %descriptor.name, "excluded by catalog glob");
                continue;
            }
            let Some((kind, date)) = classify_name(&descriptor.name) else {
                debug!(name = %descriptor.name, "unrecognized log file name");
                continue;
            };
            let sort_key = date_num(date) * ORDINAL_SPAN + ordinal as i64;
            files.push(ClassifiedLogFile { descriptor, kind, date, sort_key });
        }
        files.sort_by(|a, b| b.sort_key.cmp(&a.sort_key));
        files
    }
}

/// Recognized shapes: `{level}-*.log`, `custom{level}-*.log`,
/// `Job-{jobName}-*.log`. Everything else is not a log file.
fn classify_name(name: &str) -> Option<(LogFileKind, NaiveDate)> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let stem = base.strip_suffix(".log")?;
    let date = embedded_date(stem)?;
    if let Some(rest) = stem.strip_prefix("Job-") {
        return Some((LogFileKind::Job { job_name: job_name_of(rest) }, date));
    }
    let (prefix, _) = stem.split_once('-')?;
    if let Some(custom_level) = prefix.strip_prefix("custom") {
        let level = LogLevel::parse(custom_level)?;
        return Some((LogFileKind::Custom { level }, date));
    }
    let level = LogLevel::parse(prefix)?;
    Some((LogFileKind::Standard { level }, date))
}

/// First hyphen-separated segment of exactly eight digits that parses as a
/// calendar date.
fn embedded_date(stem: &str) -> Option<NaiveDate> {
    stem.split('-')
        .filter(|seg| seg.len() == 8 && seg.bytes().all(|b| b.is_ascii_digit()))
        .find_map(|seg| NaiveDate::parse_from_str(seg, "%Y%m%d").ok())
}

/// Job names may themselves contain hyphens; the trailing all-digit
/// date/time segments are stripped and whatever precedes them is the name.
/// Ambiguous shapes yield None so the file is still surfaced without a name.
fn job_name_of(rest: &str) -> Option<String> {
    let segments: Vec<&str> = rest.split('-').collect();
    let mut end = segments.len();
    while end > 0
        && !segments[end - 1].is_empty()
        && segments[end - 1].bytes().all(|b| b.is_ascii_digit())
    {
        end -= 1;
    }
    if end == 0 || end == segments.len() {
        return None;
    }
    Some(segments[..end].join("-"))
}

fn date_num(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).map_err(|e| LogEngineError::Config(e.to_string()))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| LogEngineError::Config(e.to_string()))
}
