//! 对外服务层

/// HTTP API
pub mod http;
