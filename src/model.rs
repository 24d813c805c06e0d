use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 远端日志目录中的一个文件,来自 WebDAV 列表。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Severity levels the platform writes log files and entry headers at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Lowercase token as used in filenames and tool arguments.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// Uppercase token as written in entry headers.
    pub fn from_header_token(tok: &str) -> Option<Self> {
        match tok {
            "ERROR" => Some(LogLevel::Error),
            "WARN" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件名归类结果,在编目时一次性判定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogFileKind {
    Standard { level: LogLevel },
    Custom { level: LogLevel },
    Job { job_name: Option<String> },
}

impl LogFileKind {
    /// Severity of a standard or custom log file; job logs carry none.
    pub fn level(&self) -> Option<LogLevel> {
        match self {
            LogFileKind::Standard { level } | LogFileKind::Custom { level } => Some(*level),
            LogFileKind::Job { .. } => None,
        }
    }

    pub fn is_job(&self) -> bool {
        matches!(self, LogFileKind::Job { .. })
    }

    pub fn job_name(&self) -> Option<&str> {
        match self {
            LogFileKind::Job { job_name } => job_name.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedLogFile {
    pub descriptor: RemoteFileDescriptor,
    pub kind: LogFileKind,
    /// Date embedded in the filename.
    pub date: NaiveDate,
    /// Ordering key; the date component always dominates the discovery ordinal.
    pub sort_key: i64,
}

/// 取回的原始内容块。文本已解码并按行对齐。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContentChunk {
    pub file_name: String,
    pub text: String,
    pub was_truncated: bool,
    /// Byte offset within the remote file where `text` begins.
    pub truncation_offset: u64,
}

/// 重组后的离散日志条目:一个头部行加零或多个续行。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Option<LogLevel>,
    pub file: String,
    /// 1-based line number of the header line within its chunk.
    pub line_number: usize,
    pub header_line: String,
    #[serde(default)]
    pub continuation_lines: Vec<String>,
    /// Headerless content found at the very start of an untruncated file.
    #[serde(default)]
    pub synthetic: bool,
}

impl LogEntry {
    /// Header plus continuation lines, newline-joined.
    pub fn full_text(&self) -> String {
        if self.continuation_lines.is_empty() {
            return self.header_line.clone();
        }
        let mut text = self.header_line.clone();
        for line in &self.continuation_lines {
            text.push('\n');
            text.push_str(line);
        }
        text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub entries: Vec<LogEntry>,
    /// Matches seen across the files actually scanned; files skipped once the
    /// limit was satisfied contribute nothing, so this is a lower bound.
    pub total_matched: u32,
    pub truncated_by_limit: bool,
    pub files_scanned: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSummary {
    pub date: NaiveDate,
    pub counts_by_level: BTreeMap<LogLevel, u32>,
    /// Normalized error signatures, deduplicated, in first-seen order.
    pub key_issues: Vec<String>,
    pub files_scanned: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionSummary {
    pub job_name: String,
    pub files: Vec<ClassifiedLogFile>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub error_entries: Vec<LogEntry>,
}
