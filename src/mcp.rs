use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{LogEngineError, Result};
use crate::tools::LogToolService;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    code: i32,
    message: String,
}

pub async fn run_stdio(service: Arc<LogToolService>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                write_response(
                    &mut stdout,
                    RpcResponse {
                        jsonrpc: "2.0",
                        id: Value::Null,
                        result: None,
                        error: Some(RpcError {
                            code: -32700,
                            message: format!("parse error: {e}"),
                        }),
                    },
                )
                .await?;
                continue;
            }
        };
        if let Some(resp) = process_request(&service, req).await {
            write_response(&mut stdout, resp).await?;
        }
    }

    Ok(())
}

/// Handle one request. Notifications (null id) get no response.
pub async fn process_request(service: &LogToolService, req: RpcRequest) -> Option<RpcResponse> {
    match req.method.as_str() {
        "initialize" => Some(handle_initialize(&req)),
        "notifications/initialized" | "notifications/cancelled" => {
            if req.id.is_null() {
                return None;
            }
            Some(RpcResponse {
                jsonrpc: "2.0",
                id: req.id,
                result: Some(Value::Bool(true)),
                error: None,
            })
        }
        "tools/list" | "list_tools" => Some(handle_list_tools(&req)),
        "tools/call" => Some(handle_tool_call(service, &req).await),
        // Tools are also callable as direct methods.
        name if tool_names().contains(&name) => {
            let result = dispatch_tool(service, name, req.params.clone()).await;
            Some(match result {
                Ok(value) => RpcResponse {
                    jsonrpc: "2.0",
                    id: req.id.clone(),
                    result: Some(value),
                    error: None,
                },
                Err(e) => rpc_error(&req, rpc_code(&e), format!("{}: {e}", e.code())),
            })
        }
        other => Some(rpc_error(&req, -32601, format!("method not found: {other}"))),
    }
}

fn handle_initialize(req: &RpcRequest) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "commerce-log-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        })),
        error: None,
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn handle_tool_call(service: &LogToolService, req: &RpcRequest) -> RpcResponse {
    let params: ToolCallParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return rpc_error(req, -32602, format!("invalid params: {e}")),
    };
    match dispatch_tool(service, &params.name, params.arguments).await {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            RpcResponse {
                jsonrpc: "2.0",
                id: req.id.clone(),
                result: Some(json!({
                    "content": [{ "type": "text", "text": text }]
                })),
                error: None,
            }
        }
        Err(e) => rpc_error(req, rpc_code(&e), format!("{}: {e}", e.code())),
    }
}

fn tool_names() -> &'static [&'static str] {
    &[
        "list_log_files",
        "get_latest_logs",
        "search_logs",
        "get_log_file_contents",
        "summarize_logs",
        "get_latest_job_log_files",
        "search_job_logs_by_name",
        "get_job_log_entries",
        "search_job_logs",
        "get_job_execution_summary",
    ]
}

#[derive(Debug, Deserialize)]
struct LatestLogsParams {
    level: String,
    limit: Option<usize>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchLogsParams {
    pattern: String,
    level: Option<String>,
    limit: Option<usize>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileContentsParams {
    filename: String,
    max_bytes: Option<u64>,
    tail_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SummarizeParams {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobFilesParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobByNameParams {
    job_name: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobEntriesParams {
    job_name: String,
    level: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobSearchParams {
    job_name: String,
    pattern: String,
    level: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobSummaryParams {
    job_name: String,
}

async fn dispatch_tool(service: &LogToolService, name: &str, args: Value) -> Result<Value> {
    match name {
        "list_log_files" => {
            let files = service.list_log_files().await?;
            Ok(json!({ "files": files }))
        }
        "get_latest_logs" => {
            let p: LatestLogsParams = parse_args(args)?;
            let entries = service
                .get_latest_logs(&p.level, p.limit, p.date.as_deref())
                .await?;
            Ok(json!({ "entries": entries }))
        }
        "search_logs" => {
            let p: SearchLogsParams = parse_args(args)?;
            let result = service
                .search_logs(&p.pattern, p.level.as_deref(), p.limit, p.date.as_deref())
                .await?;
            Ok(serde_json::to_value(result).unwrap_or(Value::Null))
        }
        "get_log_file_contents" => {
            let p: FileContentsParams = parse_args(args)?;
            let chunk = service
                .get_log_file_contents(&p.filename, p.max_bytes, p.tail_only)
                .await?;
            Ok(serde_json::to_value(chunk).unwrap_or(Value::Null))
        }
        "summarize_logs" => {
            let p: SummarizeParams = parse_optional_args(args)?;
            let summary = service.summarize_logs(p.date.as_deref()).await?;
            Ok(serde_json::to_value(summary).unwrap_or(Value::Null))
        }
        "get_latest_job_log_files" => {
            let p: JobFilesParams = parse_optional_args(args)?;
            let files = service.get_latest_job_log_files(p.limit).await?;
            Ok(json!({ "files": files }))
        }
        "search_job_logs_by_name" => {
            let p: JobByNameParams = parse_args(args)?;
            let files = service.search_job_logs_by_name(&p.job_name, p.limit).await?;
            Ok(json!({ "files": files }))
        }
        "get_job_log_entries" => {
            let p: JobEntriesParams = parse_args(args)?;
            let entries = service
                .get_job_log_entries(&p.job_name, p.level.as_deref(), p.limit)
                .await?;
            Ok(json!({ "entries": entries }))
        }
        "search_job_logs" => {
            let p: JobSearchParams = parse_args(args)?;
            let result = service
                .search_job_logs(&p.job_name, &p.pattern, p.level.as_deref(), p.limit)
                .await?;
            Ok(serde_json::to_value(result).unwrap_or(Value::Null))
        }
        "get_job_execution_summary" => {
            let p: JobSummaryParams = parse_args(args)?;
            let summary = service.get_job_execution_summary(&p.job_name).await?;
            Ok(serde_json::to_value(summary).unwrap_or(Value::Null))
        }
        other => Err(LogEngineError::Validation(format!("unknown tool: {other}"))),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| LogEngineError::Validation(format!("invalid params: {e}")))
}

/// Tools whose arguments are all optional also accept missing params.
fn parse_optional_args<T: serde::de::DeserializeOwned + Default>(args: Value) -> Result<T> {
    if args.is_null() {
        return Ok(T::default());
    }
    parse_args(args)
}

fn rpc_code(e: &LogEngineError) -> i32 {
    match e {
        LogEngineError::Validation(_) => -32602,
        LogEngineError::NotFound(_) => -32004,
        LogEngineError::Timeout(_) => -32001,
        _ => -32002,
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: RpcResponse) -> Result<()> {
    let line = serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string());
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn rpc_error(req: &RpcRequest, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: None,
        error: Some(RpcError { code, message }),
    }
}

fn handle_list_tools(req: &RpcRequest) -> RpcResponse {
    let level_schema = json!({
        "type": "string",
        "enum": ["error", "warn", "info", "debug"]
    });
    let level_or_all_schema = json!({
        "type": "string",
        "enum": ["error", "warn", "info", "debug", "all"]
    });
    let limit_schema = json!({ "type": "integer", "minimum": 1, "maximum": 1000 });
    let date_schema = json!({ "type": "string", "description": "YYYYMMDD" });

    let tools = vec![
        json!({
            "name": "list_log_files",
            "description": "List the newest log files on the instance with their kind, size and date.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "get_latest_logs",
            "description": "Newest entries of one severity across its standard and custom log files.",
            "inputSchema": {
                "type": "object",
                "required": ["level"],
                "properties": {
                    "level": level_schema,
                    "limit": limit_schema,
                    "date": date_schema
                }
            }
        }),
        json!({
            "name": "search_logs",
            "description": "Search log entries by regex or substring, newest first. Invalid regex falls back to substring matching.",
            "inputSchema": {
                "type": "object",
                "required": ["pattern"],
                "properties": {
                    "pattern": { "type": "string" },
                    "level": level_or_all_schema,
                    "limit": limit_schema,
                    "date": date_schema
                }
            }
        }),
        json!({
            "name": "get_log_file_contents",
            "description": "Raw contents of one log file, tail-first. Large files return only their trailing window.",
            "inputSchema": {
                "type": "object",
                "required": ["filename"],
                "properties": {
                    "filename": { "type": "string" },
                    "max_bytes": { "type": "integer", "minimum": 1, "maximum": 10000000 },
                    "tail_only": { "type": "boolean" }
                }
            }
        }),
        json!({
            "name": "summarize_logs",
            "description": "Per-level entry counts and recurring error signatures for one day, defaulting to the newest day present.",
            "inputSchema": {
                "type": "object",
                "properties": { "date": date_schema }
            }
        }),
        json!({
            "name": "get_latest_job_log_files",
            "description": "Newest job log files across all jobs.",
            "inputSchema": {
                "type": "object",
                "properties": { "limit": limit_schema }
            }
        }),
        json!({
            "name": "search_job_logs_by_name",
            "description": "Job log files whose job name matches exactly (case-sensitive).",
            "inputSchema": {
                "type": "object",
                "required": ["job_name"],
                "properties": {
                    "job_name": { "type": "string" },
                    "limit": limit_schema
                }
            }
        }),
        json!({
            "name": "get_job_log_entries",
            "description": "Newest entries from one job's log files, optionally filtered by level.",
            "inputSchema": {
                "type": "object",
                "required": ["job_name"],
                "properties": {
                    "job_name": { "type": "string" },
                    "level": level_or_all_schema,
                    "limit": limit_schema
                }
            }
        }),
        json!({
            "name": "search_job_logs",
            "description": "Search within one job's log files by regex or substring.",
            "inputSchema": {
                "type": "object",
                "required": ["job_name", "pattern"],
                "properties": {
                    "job_name": { "type": "string" },
                    "pattern": { "type": "string" },
                    "level": level_or_all_schema,
                    "limit": limit_schema
                }
            }
        }),
        json!({
            "name": "get_job_execution_summary",
            "description": "Correlated view of one job's latest execution: run window, status and error entries.",
            "inputSchema": {
                "type": "object",
                "required": ["job_name"],
                "properties": { "job_name": { "type": "string" } }
            }
        }),
    ];

    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: Some(json!({ "tools": tools })),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::test_support::MockRemoteStore;

    fn service_with(files: &[(&str, &str)]) -> LogToolService {
        let store = Arc::new(MockRemoteStore::with_files(files));
        LogToolService::new(store, &Config::default()).unwrap()
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest { id: json!(1), method: method.to_string(), params }
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server() {
        let service = service_with(&[]);
        let resp = process_request(&service, request("initialize", Value::Null)).await.unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "commerce-log-mcp");
    }

    #[tokio::test]
    async fn initialized_notification_gets_no_response() {
        let service = service_with(&[]);
        let req = RpcRequest {
            id: Value::Null,
            method: "notifications/initialized".into(),
            params: Value::Null,
        };
        assert!(process_request(&service, req).await.is_none());
    }

    #[tokio::test]
    async fn tools_list_names_every_tool() {
        let service = service_with(&[]);
        let resp = process_request(&service, request("tools/list", Value::Null)).await.unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 10);
        for name in tool_names() {
            assert!(
                tools.iter().any(|t| t["name"] == *name),
                "missing tool {name}"
            );
        }
    }

    #[tokio::test]
    async fn tools_call_wraps_results_as_text_content() {
        let service = service_with(&[(
            "error-blade1-20240101.log",
            "[2024-01-01 01:00:00.000 GMT] ERROR boom\n",
        )]);
        let resp = process_request(
            &service,
            request("tools/call", json!({ "name": "list_log_files", "arguments": {} })),
        )
        .await
        .unwrap();
        let result = resp.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("error-blade1-20240101.log"));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn direct_method_calls_return_raw_results() {
        let service = service_with(&[(
            "error-blade1-20240101.log",
            "[2024-01-01 01:00:00.000 GMT] ERROR boom\n",
        )]);
        let resp = process_request(
            &service,
            request("get_latest_logs", json!({ "level": "error" })),
        )
        .await
        .unwrap();
        let entries = resp.result.unwrap()["entries"].as_array().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["level"], "error");
    }

    #[tokio::test]
    async fn validation_errors_map_to_invalid_params() {
        let service = service_with(&[]);
        let resp = process_request(
            &service,
            request("get_latest_logs", json!({ "level": "fatal" })),
        )
        .await
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32602);
        assert!(err.message.starts_with("validation_error"));
    }

    #[tokio::test]
    async fn unknown_methods_report_method_not_found() {
        let service = service_with(&[]);
        let resp = process_request(&service, request("no/such", Value::Null)).await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn traversal_filenames_fail_before_any_remote_call() {
        let store = Arc::new(MockRemoteStore::new());
        let service = LogToolService::new(store.clone(), &Config::default()).unwrap();
        let resp = process_request(
            &service,
            request(
                "get_log_file_contents",
                json!({ "filename": "../../security/passwords.properties" }),
            ),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);
        assert_eq!(store.list_calls(), 0);
        assert_eq!(store.fetch_calls(), 0);
    }
}
