use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::model::{LogEntry, LogLevel, RawContentChunk};

/// 日志条目处理器:把按行对齐的文本重组为离散条目,续行归属于最近的头部行。
#[derive(Clone, Default)]
pub struct EntryProcessor;

/// Platform entry header: `[2024-01-01 01:23:45.678 GMT] LEVEL ...`.
fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}) GMT\]\s+(ERROR|WARN|INFO|DEBUG)\b",
        )
        .unwrap()
    })
}

enum ParserState {
    AwaitingFirstHeader,
    InEntry,
}

impl EntryProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Rebuild entries from a chunk.
    ///
    /// Leading lines before the first header are dropped when the chunk was
    /// truncated (their header sits in the cut-away prefix) and otherwise
    /// kept as one synthetic headerless entry. A chunk with no header at all
    /// yields no entries.
    pub fn parse(&self, chunk: &RawContentChunk) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = Vec::new();
        let mut pending: Vec<(usize, &str)> = Vec::new();
        let mut state = ParserState::AwaitingFirstHeader;

        for (idx, line) in chunk.text.lines().enumerate() {
            let line_number = idx + 1;
            match header_re().captures(line) {
                Some(caps) => {
                    if let ParserState::AwaitingFirstHeader = state {
                        if !chunk.was_truncated && pending.iter().any(|(_, l)| !l.trim().is_empty())
                        {
                            entries.push(synthetic_entry(&chunk.file_name, &pending));
                        }
                        pending.clear();
                        state = ParserState::InEntry;
                    }
                    entries.push(LogEntry {
                        timestamp: parse_header_timestamp(&caps[1]),
                        level: LogLevel::from_header_token(&caps[2]),
                        file: chunk.file_name.clone(),
                        line_number,
                        header_line: line.to_string(),
                        continuation_lines: Vec::new(),
                        synthetic: false,
                    });
                }
                None => match state {
                    ParserState::AwaitingFirstHeader => pending.push((line_number, line)),
                    ParserState::InEntry => {
                        if let Some(open) = entries.last_mut() {
                            open.continuation_lines.push(line.to_string());
                        }
                    }
                },
            }
        }
        entries
    }
}

fn synthetic_entry(file: &str, pending: &[(usize, &str)]) -> LogEntry {
    let (first_number, first_line) = pending[0];
    LogEntry {
        timestamp: None,
        level: None,
        file: file.to_string(),
        line_number: first_number,
        header_line: first_line.to_string(),
        continuation_lines: pending[1..].iter().map(|(_, l)| l.to_string()).collect(),
        synthetic: true,
    }
}

fn parse_header_timestamp(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn chunk(text: &str, was_truncated: bool) -> RawContentChunk {
        RawContentChunk {
            file_name: "error-blade1-20240101.log".to_string(),
            text: text.to_string(),
            was_truncated,
            truncation_offset: if was_truncated { 1000 } else { 0 },
        }
    }

    fn parse(text: &str, was_truncated: bool) -> Vec<LogEntry> {
        EntryProcessor::new().parse(&chunk(text, was_truncated))
    }

    #[test]
    fn chunk_starting_exactly_on_a_header_boundary() {
        let text = "[2024-01-01 01:00:00.000 GMT] ERROR PipelineCallServlet|123 boom\n\
                    [2024-01-01 01:00:01.500 GMT] WARN slow response\n";
        let entries = parse(text, true);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Some(LogLevel::Error));
        assert_eq!(
            entries[0].timestamp,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap())
        );
        assert_eq!(entries[1].level, Some(LogLevel::Warn));
        assert_eq!(entries[1].line_number, 2);
        assert!(!entries[0].synthetic);
    }

    #[test]
    fn truncated_chunk_starting_mid_stack_trace_drops_the_orphan_lines() {
        let mut text = String::from("  at com.shop.Pipeline.execute(Pipeline.java:42)\n");
        text.push_str("  at com.shop.Servlet.service(Servlet.java:99)\n");
        text.push_str("[2024-01-01 02:00:00.000 GMT] ERROR checkout failed\n");
        text.push_str("  at com.shop.Cart.total(Cart.java:17)\n");
        let entries = parse(&text, true);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header_line, "[2024-01-01 02:00:00.000 GMT] ERROR checkout failed");
        assert_eq!(entries[0].continuation_lines, vec!["  at com.shop.Cart.total(Cart.java:17)"]);
        assert_eq!(entries[0].line_number, 3);
    }

    #[test]
    fn file_start_noise_becomes_one_synthetic_entry() {
        let text = "Log started by appserver\n\
                    warming up\n\
                    [2024-01-01 03:00:00.000 GMT] INFO ready\n";
        let entries = parse(text, false);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].synthetic);
        assert_eq!(entries[0].header_line, "Log started by appserver");
        assert_eq!(entries[0].continuation_lines, vec!["warming up"]);
        assert_eq!(entries[0].timestamp, None);
        assert_eq!(entries[0].level, None);
        assert!(!entries[1].synthetic);
    }

    #[test]
    fn chunk_with_no_header_yields_no_entries() {
        let text = "noise without any header\nmore noise\n";
        assert!(parse(text, true).is_empty());
        assert!(parse(text, false).is_empty());
    }

    #[test]
    fn blank_leading_lines_alone_never_fabricate_an_entry() {
        let text = "\n   \n[2024-01-01 03:00:00.000 GMT] INFO ready\n";
        let entries = parse(text, false);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].synthetic);
    }

    #[test]
    fn continuation_lines_attach_to_the_open_entry() {
        let text = "[2024-01-01 04:00:00.000 GMT] ERROR export failed\n\
                    com.shop.ExportException: no space\n\
                    \tat Export.run(Export.java:10)\n\
                    [2024-01-01 04:00:05.000 GMT] INFO retrying\n";
        let entries = parse(text, false);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].continuation_lines.len(), 2);
        assert_eq!(
            entries[0].full_text(),
            "[2024-01-01 04:00:00.000 GMT] ERROR export failed\n\
             com.shop.ExportException: no space\n\
             \tat Export.run(Export.java:10)"
        );
        assert!(entries[1].continuation_lines.is_empty());
    }

    #[test]
    fn non_synthetic_headers_always_match_the_header_shape() {
        let text = "junk at file start\n\
                    [2024-01-01 05:00:00.000 GMT] DEBUG probe\n\
                    continuation\n\
                    [2024-01-01 05:00:01.000 GMT] WARN w\n";
        for entry in parse(text, false) {
            if !entry.synthetic {
                assert!(header_re().is_match(&entry.header_line));
            }
        }
    }

    #[test]
    fn malformed_timestamps_still_parse_as_headerless_lines() {
        // A near-miss header (no millis) is not a header at all.
        let text = "[2024-01-01 05:00:00 GMT] ERROR nope\n\
                    [2024-01-01 05:00:01.000 GMT] ERROR yes\n";
        let entries = parse(text, true);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header_line, "[2024-01-01 05:00:01.000 GMT] ERROR yes");
    }

    #[test]
    fn crlf_lines_are_handled() {
        let text = "[2024-01-01 06:00:00.000 GMT] INFO a\r\ncont\r\n";
        let entries = parse(text, false);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header_line, "[2024-01-01 06:00:00.000 GMT] INFO a");
        assert_eq!(entries[0].continuation_lines, vec!["cont"]);
    }
}
