use tracing::debug;

use crate::error::Result;
use crate::model::{
    ClassifiedLogFile, JobExecutionSummary, JobStatus, LogEntry, LogLevel, SearchResult,
};
use crate::search::{EntryFilter, PatternMatcher, ReadMode, SearchEngine};

/// 任务日志关联器:按任务名把日志文件聚合成一次执行的视图。
#[derive(Clone)]
pub struct JobCorrelator {
    engine: SearchEngine,
}

impl JobCorrelator {
    pub fn new(engine: SearchEngine) -> Self {
        Self { engine }
    }

    /// Newest job log files, regardless of job name.
    pub fn latest_files(
        &self,
        catalog: &[ClassifiedLogFile],
        limit: usize,
    ) -> Vec<ClassifiedLogFile> {
        catalog.iter().filter(|f| f.kind.is_job()).take(limit).cloned().collect()
    }

    /// Newest job log files whose parsed job name equals `job_name` exactly.
    /// Files without a parseable name never match.
    pub fn files_by_name(
        &self,
        catalog: &[ClassifiedLogFile],
        job_name: &str,
        limit: usize,
    ) -> Vec<ClassifiedLogFile> {
        files_for_job(catalog, job_name).into_iter().take(limit).collect()
    }

    /// Newest-first entries across a job's files, optionally level-filtered.
    pub async fn entries(
        &self,
        catalog: &[ClassifiedLogFile],
        job_name: &str,
        level: Option<LogLevel>,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        let files = files_for_job(catalog, job_name);
        let filter = EntryFilter { level, matcher: None };
        let result = self.engine.collect(&files, &filter, limit, ReadMode::Tail).await?;
        Ok(result.entries)
    }

    pub async fn search(
        &self,
        catalog: &[ClassifiedLogFile],
        job_name: &str,
        pattern: &str,
        level: Option<LogLevel>,
        limit: usize,
    ) -> Result<SearchResult> {
        let files = files_for_job(catalog, job_name);
        let filter = EntryFilter { level, matcher: Some(PatternMatcher::compile(pattern)) };
        self.engine.collect(&files, &filter, limit, ReadMode::Tail).await
    }

    /// One execution view: every matching file read whole, first and last
    /// timestamps as the run window, error entries verbatim.
    pub async fn execution_summary(
        &self,
        catalog: &[ClassifiedLogFile],
        job_name: &str,
    ) -> Result<JobExecutionSummary> {
        let files = files_for_job(catalog, job_name);
        if files.is_empty() {
            debug!(job = job_name, "no log files for job");
            return Ok(JobExecutionSummary {
                job_name: job_name.to_string(),
                files,
                started_at: None,
                finished_at: None,
                status: JobStatus::Unknown,
                error_entries: Vec::new(),
            });
        }

        let result =
            self.engine.collect(&files, &EntryFilter::default(), usize::MAX, ReadMode::Full).await?;
        let entries = result.entries;

        let started_at = entries.iter().filter_map(|e| e.timestamp).min();
        let finished_at = entries.iter().filter_map(|e| e.timestamp).max();
        let error_entries: Vec<LogEntry> =
            entries.iter().filter(|e| e.level == Some(LogLevel::Error)).cloned().collect();
        // Unknown is reserved for the no-files case above.
        let status =
            if error_entries.is_empty() { JobStatus::Success } else { JobStatus::Error };

        Ok(JobExecutionSummary {
            job_name: job_name.to_string(),
            files,
            started_at,
            finished_at,
            status,
            error_entries,
        })
    }
}

fn files_for_job(catalog: &[ClassifiedLogFile], job_name: &str) -> Vec<ClassifiedLogFile> {
    catalog
        .iter()
        .filter(|f| f.kind.job_name() == Some(job_name))
        .cloned()
        .collect()
}
