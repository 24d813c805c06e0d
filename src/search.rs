use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::sync::OnceLock;

use chrono::NaiveDate;
use futures::{stream, StreamExt};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::error::Result;
use crate::model::{ClassifiedLogFile, LogEntry, LogLevel, LogSummary, SearchResult};
use crate::parser::EntryProcessor;
use crate::reader::TailedReader;

/// 搜索与聚合引擎:编排读取、重组与匹配,文件间有界并发。
#[derive(Clone)]
pub struct SearchEngine {
    reader: TailedReader,
    parser: EntryProcessor,
    tail_bytes: u64,
    max_fetch_bytes: u64,
    max_concurrent_files: usize,
    key_issue_cap: usize,
}

/// How much of each file a scan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Trailing window only; recent entries are what matter.
    Tail,
    /// Whole file up to the fetch ceiling; counts must see everything.
    Full,
}

/// Entry predicate shared by latest/search/job operations.
#[derive(Clone, Default)]
pub struct EntryFilter {
    pub level: Option<LogLevel>,
    pub matcher: Option<PatternMatcher>,
}

impl EntryFilter {
    pub fn level(level: LogLevel) -> Self {
        Self { level: Some(level), matcher: None }
    }

    fn accepts(&self, entry: &LogEntry) -> bool {
        if let Some(level) = self.level {
            if entry.level != Some(level) {
                return false;
            }
        }
        if let Some(matcher) = &self.matcher {
            if !matcher.matches(&entry.full_text()) {
                return false;
            }
        }
        true
    }
}

/// Case-insensitive regex when the pattern compiles, case-insensitive
/// substring otherwise. Invalid regex syntax is a fallback, not an error.
#[derive(Clone)]
pub enum PatternMatcher {
    Regex(Regex),
    Substring(String),
}

impl PatternMatcher {
    pub fn compile(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => PatternMatcher::Regex(re),
            Err(_) => {
                debug!(pattern, "pattern is not valid regex, matching as substring");
                PatternMatcher::Substring(pattern.to_lowercase())
            }
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            PatternMatcher::Regex(re) => re.is_match(text),
            PatternMatcher::Substring(needle) => text.to_lowercase().contains(needle),
        }
    }
}

impl SearchEngine {
    pub fn new(reader: TailedReader, limits: &LimitsConfig) -> Self {
        Self {
            reader,
            parser: EntryProcessor::new(),
            tail_bytes: limits.tail_bytes,
            max_fetch_bytes: limits.max_fetch_bytes,
            max_concurrent_files: limits.max_concurrent_files,
            key_issue_cap: limits.key_issue_cap,
        }
    }

    /// Newest-first entries across `files` that pass `filter`, capped at
    /// `limit`. Files are canonical newest-first already; reads stop as soon
    /// as enough matches are in hand, so unscanned files contribute nothing
    /// to `total_matched`.
    pub async fn collect(
        &self,
        files: &[ClassifiedLogFile],
        filter: &EntryFilter,
        limit: usize,
        mode: ReadMode,
    ) -> Result<SearchResult> {
        let mut per_file: Vec<Vec<LogEntry>> = Vec::new();
        let mut total_matched: u64 = 0;
        let mut files_scanned = 0usize;

        let mut tasks = stream::iter(files.iter().cloned())
            .map(|file| {
                let reader = self.reader.clone();
                let parser = self.parser.clone();
                let filter = filter.clone();
                let window = match mode {
                    ReadMode::Tail => self.tail_bytes,
                    ReadMode::Full => self.max_fetch_bytes,
                };
                let tail = mode == ReadMode::Tail;
                async move {
                    let name = file.descriptor.name.clone();
                    let result = file_matches(&reader, &parser, &file, &filter, window, tail).await;
                    (name, result)
                }
            })
            .buffered(self.max_concurrent_files.max(1));

        while let Some((name, result)) = tasks.next().await {
            files_scanned += 1;
            match result {
                Ok(matches) => {
                    total_matched += matches.len() as u64;
                    if !matches.is_empty() {
                        per_file.push(matches);
                    }
                }
                Err(e) if e.skippable_in_scan() => {
                    debug!(file = %name, error = %e, "skipping unreadable file in scan");
                }
                Err(e) => return Err(e),
            }
            if total_matched >= limit as u64 {
                break;
            }
        }
        drop(tasks);

        let entries = merge_newest_first(&per_file, limit);
        Ok(SearchResult {
            truncated_by_limit: total_matched > entries.len() as u64,
            total_matched: total_matched.min(u32::MAX as u64) as u32,
            entries,
            files_scanned,
        })
    }

    pub async fn search(
        &self,
        files: &[ClassifiedLogFile],
        pattern: &str,
        level: Option<LogLevel>,
        limit: usize,
    ) -> Result<SearchResult> {
        let filter = EntryFilter { level, matcher: Some(PatternMatcher::compile(pattern)) };
        self.collect(files, &filter, limit, ReadMode::Tail).await
    }

    /// Per-level entry counts plus deduplicated error signatures across
    /// every file passed in. Reads whole files; a tail window would
    /// undercount.
    pub async fn summarize(
        &self,
        date: NaiveDate,
        files: &[ClassifiedLogFile],
    ) -> Result<LogSummary> {
        let mut counts_by_level: BTreeMap<LogLevel, u32> = BTreeMap::new();
        let mut key_issues: Vec<String> = Vec::new();
        let mut seen_signatures: HashSet<String> = HashSet::new();
        let mut files_scanned: Vec<String> = Vec::new();

        let mut tasks = stream::iter(files.iter().cloned())
            .map(|file| {
                let reader = self.reader.clone();
                let parser = self.parser.clone();
                let ceiling = self.max_fetch_bytes;
                async move {
                    let name = file.descriptor.name.clone();
                    if file.descriptor.size_bytes > ceiling {
                        warn!(
                            file = %name,
                            size = file.descriptor.size_bytes,
                            "file exceeds fetch ceiling, summary counts only its tail"
                        );
                    }
                    let result: Result<Vec<LogEntry>> = async {
                        let chunk = reader.read(&file, ceiling, false).await?;
                        Ok(parser.parse(&chunk))
                    }
                    .await;
                    (name, result)
                }
            })
            .buffered(self.max_concurrent_files.max(1));

        while let Some((name, result)) = tasks.next().await {
            match result {
                Ok(entries) => {
                    files_scanned.push(name);
                    for entry in entries {
                        let Some(level) = entry.level else { continue };
                        *counts_by_level.entry(level).or_insert(0) += 1;
                        if level == LogLevel::Error && key_issues.len() < self.key_issue_cap {
                            let signature = normalize_signature(&entry.header_line);
                            if !signature.is_empty() && seen_signatures.insert(signature.clone()) {
                                key_issues.push(signature);
                            }
                        }
                    }
                }
                Err(e) if e.skippable_in_scan() => {
                    debug!(file = %name, error = %e, "skipping unreadable file in summary");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(LogSummary { date, counts_by_level, key_issues, files_scanned })
    }
}

async fn file_matches(
    reader: &TailedReader,
    parser: &EntryProcessor,
    file: &ClassifiedLogFile,
    filter: &EntryFilter,
    window: u64,
    tail: bool,
) -> Result<Vec<LogEntry>> {
    let chunk = reader.read(file, window, tail).await?;
    let mut matches: Vec<LogEntry> =
        parser.parse(&chunk).into_iter().filter(|e| filter.accepts(e)).collect();
    // File order is oldest first; the merge wants newest first.
    matches.reverse();
    Ok(matches)
}

/// Heap key for the k-way merge. Newest timestamp wins; ties fall back to
/// source order (newer file first, then position within the file).
/// Timestamp-less entries sink to the end.
#[derive(PartialEq, Eq)]
struct HeapKey {
    ts: i64,
    source: usize,
    position: usize,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ts
            .cmp(&other.ts)
            .then_with(|| other.source.cmp(&self.source))
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge per-file newest-first lists into one newest-first list of at most
/// `limit` entries. Never concatenates and re-sorts; each list is consumed
/// through a heap of list heads.
fn merge_newest_first(per_file: &[Vec<LogEntry>], limit: usize) -> Vec<LogEntry> {
    let mut heap: BinaryHeap<HeapKey> = BinaryHeap::new();
    for (source, list) in per_file.iter().enumerate() {
        if let Some(first) = list.first() {
            heap.push(HeapKey { ts: entry_ts(first), source, position: 0 });
        }
    }

    let mut out = Vec::new();
    while out.len() < limit {
        let Some(HeapKey { source, position, .. }) = heap.pop() else { break };
        out.push(per_file[source][position].clone());
        let next = position + 1;
        if next < per_file[source].len() {
            heap.push(HeapKey { ts: entry_ts(&per_file[source][next]), source, position: next });
        }
    }
    out
}

fn entry_ts(entry: &LogEntry) -> i64 {
    entry.timestamp.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN)
}

/// Collapse a header line into a stable signature: the bracketed timestamp
/// prefix goes away, digit runs flatten to `#`, whitespace squeezes to
/// single spaces.
pub fn normalize_signature(header: &str) -> String {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let prefix = PREFIX.get_or_init(|| Regex::new(r"^\[[^\]]*\]\s*").unwrap());
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").unwrap());

    let stripped = prefix.replace(header, "");
    let flattened = digits.replace_all(&stripped, "#");
    flattened.split_whitespace().collect::<Vec<_>>().join(" ")
}
