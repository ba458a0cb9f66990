//! 命名查询注册表
//!
//! 进程启动时构建一次，之后只读，由 [`QueryExecutor`](super::QueryExecutor)
//! 以 `Arc` 共享给所有请求。
//!
//! 带 [`DefaultWindow`] 的定义，其 `validAtStart` / `validAtEnd` 默认值在每次请求时
//! 以当前时刻重新计算；`default_parameters` 中的窗口仅反映构建时刻。

use std::collections::HashMap;

use super::params::{ParamValue, ParameterSet};
use super::pipeline::{PipelineTemplate, Stage};
use crate::utils::config::QueryConfig;
use crate::{QueryError, Result};

/// 时间窗口原始数据
pub const VALUES: &str = "values";
/// 时间窗口计数
pub const VALUES_COUNT: &str = "valuesCnt";
/// 按设备/时间透视
pub const VALUES_PER_DEVICE: &str = "valuesPerDevice";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// 默认时间窗口，终点为请求时刻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultWindow {
    /// `[now - span_ms, now]`
    Trailing { span_ms: i64 },
    /// `[0, now]`
    SinceEpoch,
}

impl DefaultWindow {
    pub fn resolve(&self, now_ms: i64) -> (i64, i64) {
        match self {
            DefaultWindow::Trailing { span_ms } => (now_ms - span_ms, now_ms),
            DefaultWindow::SinceEpoch => (0, now_ms),
        }
    }
}

/// 命名查询定义
#[derive(Debug, Clone)]
pub struct QueryDefinition {
    /// 查询名（路由键）
    pub name: String,
    /// 目标集合
    pub collection: String,
    /// 默认参数，`Null` 表示不过滤
    pub default_parameters: ParameterSet,
    /// 管道生成模板
    pub template: PipelineTemplate,
    /// 随请求时刻滚动的默认窗口
    pub window: Option<DefaultWindow>,
}

impl QueryDefinition {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        template: PipelineTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            default_parameters: ParameterSet::new(),
            template,
            window: None,
        }
    }

    pub fn with_default(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.default_parameters.insert(key.into(), value);
        self
    }

    /// 设置滚动窗口，并以 `anchor_ms` 写入一份静态默认值
    pub fn with_window(mut self, window: DefaultWindow, anchor_ms: i64) -> Self {
        self.window = Some(window);
        apply_window(&mut self.default_parameters, window, anchor_ms);
        self
    }

    /// 以 `now_ms` 为终点的默认参数
    pub fn defaults_at(&self, now_ms: i64) -> ParameterSet {
        let mut params = self.default_parameters.clone();
        if let Some(window) = self.window {
            apply_window(&mut params, window, now_ms);
        }
        params
    }

    pub fn build_pipeline(&self, params: &ParameterSet) -> Vec<Stage> {
        self.template.build(params)
    }
}

fn apply_window(params: &mut ParameterSet, window: DefaultWindow, now_ms: i64) {
    let (start, end) = window.resolve(now_ms);
    params.insert("validAtStart".to_string(), ParamValue::Timestamp(start));
    params.insert("validAtEnd".to_string(), ParamValue::Timestamp(end));
}

/// 命名查询注册表
#[derive(Debug, Default)]
pub struct QueryRegistry {
    definitions: HashMap<String, QueryDefinition>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册查询定义，同名定义被替换并返回旧定义
    pub fn register(&mut self, definition: QueryDefinition) -> Option<QueryDefinition> {
        let previous = self
            .definitions
            .insert(definition.name.clone(), definition);
        if let Some(ref old) = previous {
            log::warn!("Query definition '{}' replaced", old.name);
        }
        previous
    }

    pub fn lookup(&self, name: &str) -> Result<&QueryDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| QueryError::UnknownQuery(name.to_string()))
    }

    /// 按名称排序的全部定义
    pub fn definitions(&self) -> Vec<&QueryDefinition> {
        let mut all: Vec<_> = self.definitions.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// 内置查询定义
    ///
    /// `now_ms` 只用于静态默认值（目录展示），执行时窗口随请求时刻滚动
    pub fn builtin(now_ms: i64, config: &QueryConfig) -> Self {
        let trailing = DefaultWindow::Trailing {
            span_ms: config.default_window_days * DAY_MS,
        };
        let mut registry = Self::new();

        registry.register(
            QueryDefinition::new(
                VALUES,
                "values",
                PipelineTemplate::WindowedFetch {
                    limit: config.max_rows,
                },
            )
            .with_window(trailing, now_ms)
            .with_default("deviceId", ParamValue::Null)
            .with_default("valueType", ParamValue::Null),
        );

        registry.register(
            QueryDefinition::new(VALUES_COUNT, "values", PipelineTemplate::WindowedCount)
                .with_window(trailing, now_ms)
                .with_default("deviceId", ParamValue::Null)
                .with_default("valueType", ParamValue::Null),
        );

        registry.register(
            QueryDefinition::new(VALUES_PER_DEVICE, "values", PipelineTemplate::Pivot)
                .with_window(DefaultWindow::SinceEpoch, now_ms)
                .with_default("deviceId", ParamValue::Null),
        );

        log::info!("Query registry initialized with {} definitions", registry.len());
        registry
    }
}
