//! HTTP API 请求/响应模型

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::query::params::ParameterSet;
use crate::query::pipeline::PipelineTemplate;
use crate::query::registry::QueryDefinition;

/// 错误响应 `{"error": <message>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// 原始过滤查询参数
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyQuery {
    /// URL 编码的 JSON 过滤条件
    pub q: Option<String>,
}

/// 命名查询描述
#[derive(Debug, Clone, Serialize)]
pub struct QueryDescriptor {
    pub name: String,
    pub collection: String,
    /// fetch | count | pivot | custom
    pub shape: &'static str,
    pub parameters: ParameterSet,
}

impl From<&QueryDefinition> for QueryDescriptor {
    fn from(definition: &QueryDefinition) -> Self {
        let shape = match definition.template {
            PipelineTemplate::WindowedFetch { .. } => "fetch",
            PipelineTemplate::WindowedCount => "count",
            PipelineTemplate::Pivot => "pivot",
            PipelineTemplate::Custom(_) => "custom",
        };
        Self {
            name: definition.name.clone(),
            collection: definition.collection.clone(),
            shape,
            parameters: definition.default_parameters.clone(),
        }
    }
}

/// 健康检查响应
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: String,
    pub queries: usize,
}

/// 结果行 → relaxed Extended JSON
pub fn rows_to_json(rows: Vec<Document>) -> Vec<serde_json::Value> {
    rows.into_iter()
        .map(|row| Bson::Document(row).into_relaxed_extjson())
        .collect()
}
