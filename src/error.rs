use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogEngineError>;

#[derive(Debug, Error)]
pub enum LogEngineError {
    #[error("连接错误: {0}")]
    Connection(String),

    #[error("远端认证被拒绝: {0}")]
    Auth(String),

    #[error("远端文件不存在: {0}")]
    NotFound(String),

    #[error("无效请求: {0}")]
    Validation(String),

    #[error("操作超时 ({0}ms)")]
    Timeout(u64),

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LogEngineError {
    /// Stable machine-readable code surfaced alongside the human message.
    pub fn code(&self) -> &'static str {
        match self {
            LogEngineError::Connection(_) => "connection_error",
            LogEngineError::Auth(_) => "auth_error",
            LogEngineError::NotFound(_) => "not_found",
            LogEngineError::Validation(_) => "validation_error",
            LogEngineError::Timeout(_) => "timeout",
            LogEngineError::Config(_) => "config_error",
            LogEngineError::Io(_) => "io_error",
        }
    }

    /// Per-file failures that multi-file scans skip instead of aborting on.
    /// Auth failures are not skippable: they would blank out every file.
    pub fn skippable_in_scan(&self) -> bool {
        matches!(
            self,
            LogEngineError::NotFound(_) | LogEngineError::Connection(_)
        )
    }
}

impl From<reqwest::Error> for LogEngineError {
    fn from(e: reqwest::Error) -> Self {
        // Upstream response bodies are never embedded here; reqwest errors
        // only describe our own request and the failure class.
        LogEngineError::Connection(e.to_string())
    }
}
