use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use commerce_log_mcp::config::{Config, ServerMode};
use commerce_log_mcp::error::Result;
use commerce_log_mcp::http::serve_http;
use commerce_log_mcp::mcp::run_stdio;
use commerce_log_mcp::tools::LogToolService;
use commerce_log_mcp::webdav::WebDavClient;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout 是 MCP 通道,日志一律走 stderr。
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <config.yaml|json>", args[0]);
        std::process::exit(1);
    }

    let config = Config::load_from_path(std::path::Path::new(&args[1]))?;
    let store = Arc::new(WebDavClient::new(&config.remote)?);
    let service = Arc::new(LogToolService::new(store, &config)?);

    info!(mode = ?config.server.mode, base_url = %config.remote.base_url, "starting");

    match config.server.mode {
        ServerMode::Stdio => {
            run_stdio(service).await?;
        }
        ServerMode::Http => {
            serve_http(service, &config).await?;
        }
        ServerMode::Both => {
            let http_service = service.clone();
            let http_config = config.clone();
            let http_task =
                tokio::spawn(async move { serve_http(http_service, &http_config).await });
            // stdio 会话结束(stdin 关闭)即退出,HTTP 任务随之停止。
            run_stdio(service).await?;
            http_task.abort();
            if let Ok(result) = http_task.await {
                result?;
            }
        }
    }

    Ok(())
}
