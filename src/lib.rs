//! # IOTSRV-QUERY
//!
//! 设备遥测只读查询服务 - 基于文档数据库
//!
//! ## 核心能力
//!
//! - **参数转换**: 查询字符串 → 数值 / 时间戳 / 文本
//! - **命名查询**: 默认参数 + 调用方覆盖 → 聚合管道
//! - **原始过滤**: `/values`、`/log` 直接转发结构化过滤条件
//! - **对外服务**: HTTP API (基于 Actix-web)
//!
//! ## 架构设计
//!
//! ```text
//! 客户端 (HTTP GET)
//!     ↓
//! Service Layer (service/)
//!     ↓
//! Query Executor (query/executor)
//!     ↓  lookup → merge → build_pipeline
//! Query Registry / Params / Pipeline (query/)
//!     ↓
//! Document Store (storage/) ← MongoDB / 内存实现
//! ```

// ============================================================================
// 内部模块
// ============================================================================

/// 查询核心：参数转换、命名查询注册表、管道生成、执行器
pub mod query;

/// 文档存储抽象 (MongoDB + 内存实现)
pub mod storage;

/// 对外服务层 (HTTP)
pub mod service;

/// 工具模块
pub mod utils;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use query::executor::QueryExecutor;
pub use query::params::{coerce, merge, ParamValue, ParameterSet};
pub use query::pipeline::{PipelineTemplate, Stage};
pub use query::registry::{QueryDefinition, QueryRegistry};
pub use storage::{DocumentStore, StoreError};

// ============================================================================
// 全局错误类型
// ============================================================================

/// 查询错误类型
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// 必需的过滤参数缺失
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// 调用方输入无法解析为结构化过滤条件
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    /// 注册表中没有该命名查询
    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    /// 存储层执行失败（超时、断连、查询错误）
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;
