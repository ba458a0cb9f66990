//! 文档存储模块
//!
//! 执行器只依赖 [`DocumentStore`]，运行时注入具体实现：
//! - [`mongo::MongoStore`]：生产环境 MongoDB
//! - [`memory::MemoryStore`]：进程内实现，用于测试和本地调试（数据来自种子文件）

use async_trait::async_trait;
use mongodb::bson::Document;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::query::pipeline::Stage;
use crate::utils::config::{StoreBackend, StoreConfig};
use crate::QueryError;

// MongoDB 实现
pub mod mongo;

// 进程内实现（管道求值器）
pub mod memory;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::ExecutionFailed(e.to_string())
    }
}

/// 只读文档存储
///
/// 实现需支持并发的独立操作，所有调用均为只读
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 在集合上执行聚合管道
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError>;

    /// 过滤 + 投影
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Document,
    ) -> Result<Vec<Document>, StoreError>;
}

/// 按配置创建存储，MongoDB 连接失败直接返回错误（启动时快速失败）
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match config.backend {
        StoreBackend::Mongodb => {
            let store = MongoStore::connect(
                &config.uri,
                &config.database,
                Duration::from_millis(config.connect_timeout_ms),
            )
            .await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            log::warn!("Using in-memory document store (testing only), data is not persisted");
            let store = match &config.seed_path {
                Some(path) => MemoryStore::load_seed_file(path)?,
                None => {
                    log::warn!("No store.seed_path configured, every query returns empty results");
                    MemoryStore::new()
                }
            };
            Ok(Arc::new(store))
        }
    }
}
