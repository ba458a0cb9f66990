//! 查询执行器
//!
//! 两条互相独立的访问路径：
//! - 命名查询：lookup → merge → build_pipeline → aggregate，调用方只能填充模板参数
//! - 原始过滤（`/values`、`/log`）：调用方提供任意 JSON 过滤条件，原样转发给存储，
//!   不限制过滤条件的形状，只限制集合与返回字段
//!
//! 存储错误不重试，统一转为 [`QueryError::ExecutionFailed`]。

use mongodb::bson::{doc, Document};
use std::sync::Arc;

use super::params::merge;
use super::pipeline::Stage;
use super::registry::QueryRegistry;
use crate::storage::DocumentStore;
use crate::{QueryError, Result};

/// 原始过滤路径允许访问的集合
pub const LEGACY_COLLECTIONS: [&str; 2] = ["values", "log"];

/// 原始过滤路径返回的字段
pub const LEGACY_FIELDS: [&str; 4] = ["validAt", "deviceId", "valueType", "value"];

/// 当前时刻（毫秒）
pub type Clock = fn() -> i64;

fn system_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 查询执行器
pub struct QueryExecutor {
    registry: Arc<QueryRegistry>,
    store: Arc<dyn DocumentStore>,
    clock: Clock,
}

impl QueryExecutor {
    pub fn new(registry: Arc<QueryRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            registry,
            store,
            clock: system_now_ms,
        }
    }

    /// 替换时钟，默认窗口以其返回值为终点
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// 执行命名查询
    pub async fn execute<I, K, V>(&self, name: &str, overrides: I) -> Result<Vec<Document>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let definition = self.registry.lookup(name)?;
        let params = merge(&definition.defaults_at((self.clock)()), overrides);
        let pipeline = definition.build_pipeline(&params);

        log::debug!(
            "Executing query '{}' on '{}' ({} stages): {:?}",
            definition.name,
            definition.collection,
            pipeline.len(),
            pipeline.iter().map(Stage::to_document).collect::<Vec<_>>()
        );

        let mut rows = self
            .store
            .aggregate(&definition.collection, &pipeline)
            .await
            .map_err(|e| {
                log::error!(
                    "Error executing query '{}' on collection '{}': {}",
                    definition.name,
                    definition.collection,
                    e
                );
                QueryError::from(e)
            })?;

        if rows.is_empty() {
            if let Some(fallback) = definition.template.empty_result() {
                rows.push(fallback);
            }
        }

        Ok(rows)
    }

    /// 原始过滤查询
    ///
    /// `q` 为空或缺失 → `MissingParameter`；无法解析为 JSON 对象 → `MalformedFilter`
    pub async fn find_raw(&self, collection: &str, q: Option<&str>) -> Result<Vec<Document>> {
        if !LEGACY_COLLECTIONS.contains(&collection) {
            return Err(QueryError::UnknownQuery(collection.to_string()));
        }

        let text = q
            .filter(|s| !s.is_empty())
            .ok_or_else(|| QueryError::MissingParameter("q".to_string()))?;
        let filter = parse_filter(text)?;

        self.store
            .find(collection, filter, legacy_projection())
            .await
            .map_err(|e| {
                log::error!("Error executing query on collection {}: {}", collection, e);
                QueryError::from(e)
            })
    }
}

/// 解析调用方提供的 JSON 过滤条件，必须是 JSON 对象
pub fn parse_filter(text: &str) -> Result<Document> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| QueryError::MalformedFilter(e.to_string()))?;

    match value {
        serde_json::Value::Object(map) => mongodb::bson::to_document(&map)
            .map_err(|e| QueryError::MalformedFilter(e.to_string())),
        other => Err(QueryError::MalformedFilter(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn legacy_projection() -> Document {
    let mut projection = doc! { "_id": 0 };
    for field in LEGACY_FIELDS {
        projection.insert(field, 1);
    }
    projection
}
