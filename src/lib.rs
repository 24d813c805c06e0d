//! 远端商城日志发现与分析引擎核心库
//! 通过 WebDAV 读取实例日志,按 MCP 工具形式暴露给 AI 代理。

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod mcp;
pub mod model;
pub mod parser;
pub mod reader;
pub mod search;
pub mod tools;
pub mod webdav;

pub mod test_support;
