use std::sync::Arc;

use commerce_log_mcp::config::Config;
use commerce_log_mcp::error::LogEngineError;
use commerce_log_mcp::model::LogLevel;
use commerce_log_mcp::test_support::MockRemoteStore;
use commerce_log_mcp::tools::LogToolService;

fn service_over(store: &Arc<MockRemoteStore>) -> LogToolService {
    let mut config = Config::default();
    config.cache.enabled = false;
    LogToolService::new(store.clone(), &config).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_latest_error_logs_filter_by_entry_level() {
    // 目录里同时有 error 和 warn 文件;只取 error 文件里的 ERROR 条目。
    let store = Arc::new(MockRemoteStore::with_files(&[
        (
            "error-blade-20240101-000001.log",
            "[2024-01-01 01:00:00.000 GMT] ERROR PipelineCallServlet|1|OutOfStock for sku 1001\n\
             [2024-01-01 01:05:00.000 GMT] WARN PipelineCallServlet|2|retrying inventory lookup\n",
        ),
        (
            "warn-blade-20240101-000001.log",
            "[2024-01-01 01:06:00.000 GMT] WARN PipelineCallServlet|3|slow response\n",
        ),
    ]));
    let service = service_over(&store);

    let entries = service.get_latest_logs("error", Some(10), Some("20240101")).await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, Some(LogLevel::Error));
    assert_eq!(
        entries[0].header_line,
        "[2024-01-01 01:00:00.000 GMT] ERROR PipelineCallServlet|1|OutOfStock for sku 1001"
    );
    // warn 文件从未被读取
    assert_eq!(store.fetch_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tail_read_starts_on_a_complete_header_line() {
    let mut content = String::new();
    for i in 0..8000u32 {
        content.push_str(&format!(
            "[2024-01-01 {:02}:{:02}:{:02}.000 GMT] ERROR SystemJobThread|8|OrderExport retry attempt {:05}\n",
            i / 3600,
            (i / 60) % 60,
            i % 60,
            i
        ));
    }
    let file_size = content.len() as u64;
    assert!(file_size > 500 * 1024);

    let store = Arc::new(MockRemoteStore::new());
    store.put("error-blade-20240101.log", &content);
    let service = service_over(&store);

    let chunk = service
        .get_log_file_contents("error-blade-20240101.log", Some(200 * 1024), Some(true))
        .await
        .unwrap();

    assert!(chunk.was_truncated);
    let first = chunk.text.lines().next().unwrap();
    assert!(first.starts_with("[2024-01-01 "), "partial first line leaked: {first:?}");
    assert!(first.contains("] ERROR "));
    // 丢掉半行后,偏移加上文本长度仍须等于文件大小
    assert_eq!(chunk.truncation_offset + chunk.text.len() as u64, file_size);
    assert!(chunk.text.len() as u64 <= 200 * 1024);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_small_file_reads_are_byte_identical_either_way() {
    let content = "[2024-01-01 01:00:00.000 GMT] INFO PipelineCallServlet|1|startup complete\n";
    let store = Arc::new(MockRemoteStore::with_files(&[("info-blade-20240101.log", content)]));
    let service = service_over(&store);

    let tail = service
        .get_log_file_contents("info-blade-20240101.log", Some(200 * 1024), Some(true))
        .await
        .unwrap();
    let full = service
        .get_log_file_contents("info-blade-20240101.log", Some(200 * 1024), Some(false))
        .await
        .unwrap();

    assert_eq!(tail, full);
    assert!(!tail.was_truncated);
    assert_eq!(tail.truncation_offset, 0);
    assert_eq!(tail.text, content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_stops_at_limit_and_reports_truncation() {
    let mut matches = String::new();
    for i in 0..7u32 {
        matches.push_str(&format!(
            "[2024-01-01 02:00:{:02}.000 GMT] ERROR PipelineCallServlet|9|OutOfStock sku {}\n",
            i,
            4000 + i
        ));
    }
    let store = Arc::new(MockRemoteStore::with_files(&[
        ("error-blade1-20240101.log", "[2024-01-01 01:00:00.000 GMT] ERROR unrelated failure\n"),
        ("error-blade2-20240101.log", &matches),
        ("error-blade3-20240101.log", "[2024-01-01 01:10:00.000 GMT] ERROR another failure\n"),
    ]));
    let service = service_over(&store);

    let result = service.search_logs("OutOfStock", Some("error"), Some(5), None).await.unwrap();

    assert_eq!(result.entries.len(), 5);
    assert!(result.truncated_by_limit);
    assert_eq!(result.total_matched, 7);
    // 第二个文件满足上限后,第三个文件不再扫描
    assert_eq!(result.files_scanned, 2);
    // 条目按时间从新到旧
    for pair in result.entries.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
    assert_eq!(
        result.entries[0].header_line,
        "[2024-01-01 02:00:06.000 GMT] ERROR PipelineCallServlet|9|OutOfStock sku 4006"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_is_idempotent_for_a_fixed_directory() {
    let store = Arc::new(MockRemoteStore::with_files(&[
        (
            "error-blade1-20240102.log",
            "[2024-01-02 03:00:00.000 GMT] ERROR OutOfStock sku 77\n\
             [2024-01-02 03:01:00.000 GMT] ERROR timeout calling inventory\n",
        ),
        ("error-blade2-20240101.log", "[2024-01-01 09:00:00.000 GMT] ERROR OutOfStock sku 12\n"),
    ]));
    let service = service_over(&store);

    let first = service.search_logs("outofstock", Some("error"), Some(10), None).await.unwrap();
    let second = service.search_logs("outofstock", Some("error"), Some(10), None).await.unwrap();

    assert_eq!(first.entries, second.entries);
    assert_eq!(first.total_matched, second.total_matched);
    assert_eq!(first.files_scanned, second.files_scanned);
    assert_eq!(first.entries.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listing_is_sorted_descending_and_capped() {
    let store = Arc::new(MockRemoteStore::new());
    for i in 0..60u32 {
        let month = 1 + i / 28;
        let day = 1 + i % 28;
        store.put(
            &format!("error-blade-2024{month:02}{day:02}.log"),
            "[2024-01-01 00:00:00.000 GMT] ERROR x\n",
        );
    }
    let service = service_over(&store);

    let files = service.list_log_files().await.unwrap();

    // 默认展示上限为 50
    assert_eq!(files.len(), 50);
    for pair in files.windows(2) {
        assert!(pair[0].sort_key > pair[1].sort_key);
    }
    assert_eq!(files[0].descriptor.name, "error-blade-20240304.log");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_summary_defaults_to_newest_date_and_skips_job_files() {
    let store = Arc::new(MockRemoteStore::with_files(&[
        (
            "error-blade1-20240102.log",
            "[2024-01-02 01:00:00.000 GMT] ERROR OutOfStock sku 123\n\
             [2024-01-02 01:05:00.000 GMT] ERROR OutOfStock sku 999\n",
        ),
        (
            "custominfo-blade1-20240102.log",
            "[2024-01-02 01:02:00.000 GMT] INFO export finished in 420 ms\n",
        ),
        ("error-blade1-20240101.log", "[2024-01-01 01:00:00.000 GMT] ERROR stale failure\n"),
        (
            "Job-ImportCatalog-20240102-010000.log",
            "[2024-01-02 01:03:00.000 GMT] ERROR job failure must not be counted\n",
        ),
    ]));
    let service = service_over(&store);

    let summary = service.summarize_logs(None).await.unwrap();

    assert_eq!(summary.date.format("%Y%m%d").to_string(), "20240102");
    assert_eq!(summary.counts_by_level.get(&LogLevel::Error), Some(&2));
    assert_eq!(summary.counts_by_level.get(&LogLevel::Info), Some(&1));
    // 两条 OutOfStock 归一成同一个签名
    assert_eq!(summary.key_issues, vec!["ERROR OutOfStock sku #"]);
    assert_eq!(summary.files_scanned.len(), 2);
    assert!(!summary.files_scanned.iter().any(|f| f.starts_with("Job-")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scans_skip_dead_files_but_fail_on_auth() {
    let store = Arc::new(MockRemoteStore::with_files(&[
        ("error-blade1-20240101.log", "[2024-01-01 01:00:00.000 GMT] ERROR OutOfStock a\n"),
        ("error-blade2-20240101.log", "[2024-01-01 01:01:00.000 GMT] ERROR OutOfStock b\n"),
        ("error-blade3-20240101.log", "[2024-01-01 01:02:00.000 GMT] ERROR OutOfStock c\n"),
    ]));
    store.fail_connection("error-blade2-20240101.log");
    let service = service_over(&store);

    let result = service.search_logs("OutOfStock", Some("error"), Some(10), None).await.unwrap();
    assert_eq!(result.entries.len(), 2);
    assert_eq!(result.files_scanned, 3);

    store.fail_auth("error-blade1-20240101.log");
    let err = service.search_logs("OutOfStock", Some("error"), Some(10), None).await.unwrap_err();
    match err {
        LogEngineError::Auth(_) => {}
        e => panic!("unexpected error: {:?}", e),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_traversal_filenames_rejected_before_any_remote_call() {
    let store = Arc::new(MockRemoteStore::new());
    let service = service_over(&store);

    let err = service.get_log_file_contents("../../etc/passwd", None, None).await.unwrap_err();

    match err {
        LogEngineError::Validation(_) => {}
        e => panic!("unexpected error: {:?}", e),
    }
    assert_eq!(store.list_calls(), 0);
    assert_eq!(store.fetch_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_out_of_range_arguments_are_rejected() {
    let store = Arc::new(MockRemoteStore::new());
    let service = service_over(&store);

    let err = service.get_latest_logs("error", Some(0), None).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = service.get_latest_logs("error", Some(1001), None).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = service
        .get_log_file_contents("error-blade-20240101.log", Some(10_000_001), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = service.get_latest_logs("fatal", None, None).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = service.get_latest_logs("error", None, Some("2024-01-01")).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    assert_eq!(store.list_calls(), 0);
    assert_eq!(store.fetch_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listing_cache_avoids_repeat_remote_listings() {
    let store = Arc::new(MockRemoteStore::with_files(&[(
        "error-blade-20240101.log",
        "[2024-01-01 01:00:00.000 GMT] ERROR x\n",
    )]));
    let config = Config::default();
    assert!(config.cache.enabled);
    let service = LogToolService::new(store.clone(), &config).unwrap();

    let first = service.list_log_files().await.unwrap();
    let second = service.list_log_files().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.list_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_file_is_not_found() {
    let store = Arc::new(MockRemoteStore::with_files(&[(
        "error-blade-20240101.log",
        "[2024-01-01 01:00:00.000 GMT] ERROR x\n",
    )]));
    let service = service_over(&store);

    let err =
        service.get_log_file_contents("error-blade-20240102.log", None, None).await.unwrap_err();

    match err {
        LogEngineError::NotFound(name) => assert_eq!(name, "error-blade-20240102.log"),
        e => panic!("unexpected error: {:?}", e),
    }
}
