//! 聚合管道生成
//!
//! 每个命名查询绑定一个 [`PipelineTemplate`]，把最终参数集映射为有序的
//! [`Stage`] 序列。生成过程是纯函数：不做 I/O，不会失败，每次请求重新生成。

use mongodb::bson::{doc, Bson, Document};

use super::params::{ParamValue, ParameterSet};

/// 原始数据查询的行数上限
pub const RAW_ROW_LIMIT: i64 = 1000;

/// 窗口查询保留的字段（白名单，不接受调用方注入字段）
pub const WINDOW_FIELDS: [&str; 5] = ["receivedAt", "validAt", "deviceId", "valueType", "value"];

/// 管道阶段
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// 过滤
    Match(Document),
    /// 字段投影 / 重命名
    Project(Document),
    /// 分组聚合
    Group(Document),
    /// 追加或覆盖计算字段
    Set(Document),
    /// 以表达式结果替换整行
    ReplaceRoot(Bson),
    /// 计数，输出 `{<field>: N}`
    Count(String),
    /// 行数上限
    Limit(i64),
    /// 排序（1 升序，-1 降序）
    Sort(Document),
}

impl Stage {
    /// 阶段操作符
    pub fn operator(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Group(_) => "$group",
            Stage::Set(_) => "$set",
            Stage::ReplaceRoot(_) => "$replaceRoot",
            Stage::Count(_) => "$count",
            Stage::Limit(_) => "$limit",
            Stage::Sort(_) => "$sort",
        }
    }

    /// 转换为存储可执行的阶段文档
    pub fn to_document(&self) -> Document {
        let body = match self {
            Stage::Match(d) | Stage::Project(d) | Stage::Group(d) | Stage::Set(d) | Stage::Sort(d) => {
                Bson::Document(d.clone())
            }
            Stage::ReplaceRoot(expr) => Bson::Document(doc! { "newRoot": expr.clone() }),
            Stage::Count(field) => Bson::String(field.clone()),
            Stage::Limit(n) => Bson::Int64(*n),
        };
        let mut stage = Document::new();
        stage.insert(self.operator(), body);
        stage
    }
}

pub fn to_documents(pipeline: &[Stage]) -> Vec<Document> {
    pipeline.iter().map(Stage::to_document).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// 管道模板
// ═══════════════════════════════════════════════════════════════════════════

/// 管道模板
#[derive(Debug, Clone, Copy)]
pub enum PipelineTemplate {
    /// 时间窗口原始数据：过滤 → 白名单投影 → 行数上限
    WindowedFetch { limit: i64 },
    /// 时间窗口计数：过滤 → 计数
    WindowedCount,
    /// 按 (validAt, deviceId) 透视为宽表行，按 validAt 升序
    Pivot,
    /// 自定义生成函数
    Custom(fn(&ParameterSet) -> Vec<Stage>),
}

impl PipelineTemplate {
    pub fn build(&self, params: &ParameterSet) -> Vec<Stage> {
        match self {
            PipelineTemplate::WindowedFetch { limit } => windowed_fetch(params, *limit),
            PipelineTemplate::WindowedCount => windowed_count(params),
            PipelineTemplate::Pivot => pivot(params),
            PipelineTemplate::Custom(build) => build(params),
        }
    }

    /// 结果为空时的替代输出
    ///
    /// 存储的 `$count` 在无匹配时不输出任何行，计数查询统一返回 `{count: 0}`
    pub fn empty_result(&self) -> Option<Document> {
        match self {
            PipelineTemplate::WindowedCount => Some(doc! { "count": 0_i32 }),
            _ => None,
        }
    }
}

fn param_bson(params: &ParameterSet, key: &str) -> Bson {
    params.get(key).map(ParamValue::to_bson).unwrap_or(Bson::Null)
}

/// validAt 闭区间 + 可选等值过滤（仅对已设置的参数生效）
pub fn window_filter(params: &ParameterSet, narrow_by: &[&str]) -> Document {
    let mut filter = doc! {
        "validAt": {
            "$gte": param_bson(params, "validAtStart"),
            "$lte": param_bson(params, "validAtEnd"),
        }
    };
    for field in narrow_by {
        if let Some(value) = params.get(*field).filter(|v| v.is_set()) {
            filter.insert(*field, value.to_bson());
        }
    }
    filter
}

pub fn windowed_fetch(params: &ParameterSet, limit: i64) -> Vec<Stage> {
    let mut projection = doc! { "_id": 0 };
    for field in WINDOW_FIELDS {
        projection.insert(field, 1);
    }

    vec![
        Stage::Match(window_filter(params, &["deviceId", "valueType"])),
        Stage::Project(projection),
        Stage::Limit(limit),
    ]
}

pub fn windowed_count(params: &ParameterSet) -> Vec<Stage> {
    vec![
        Stage::Match(window_filter(params, &["deviceId", "valueType"])),
        Stage::Count("count".to_string()),
    ]
}

pub fn pivot(params: &ParameterSet) -> Vec<Stage> {
    vec![
        Stage::Match(window_filter(params, &["deviceId"])),
        Stage::Group(doc! {
            "_id": { "validAt": "$validAt", "deviceId": "$deviceId" },
            "values": { "$push": { "k": "$valueType", "v": "$value" } },
        }),
        Stage::Set(doc! {
            "values": { "$arrayToObject": "$values" },
        }),
        Stage::Project(doc! {
            "_id": 0,
            "validAt": "$_id.validAt",
            "deviceId": "$_id.deviceId",
            "values": 1,
        }),
        Stage::Set(doc! {
            "combined": {
                "$mergeObjects": ["$values", { "validAt": "$validAt", "deviceId": "$deviceId" }],
            },
        }),
        Stage::ReplaceRoot(Bson::String("$combined".to_string())),
        Stage::Sort(doc! { "validAt": 1 }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: i64, end: i64) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("validAtStart".to_string(), ParamValue::Timestamp(start));
        params.insert("validAtEnd".to_string(), ParamValue::Timestamp(end));
        params.insert("deviceId".to_string(), ParamValue::Null);
        params.insert("valueType".to_string(), ParamValue::Null);
        params
    }

    #[test]
    fn test_window_filter_without_optional_params() {
        let filter = window_filter(&window(10, 20), &["deviceId", "valueType"]);
        assert_eq!(
            filter,
            doc! { "validAt": { "$gte": 10_i64, "$lte": 20_i64 } }
        );
    }

    #[test]
    fn test_window_filter_with_device_and_type() {
        let mut params = window(10, 20);
        params.insert("deviceId".to_string(), ParamValue::text("d1"));
        params.insert("valueType".to_string(), ParamValue::text("temp"));

        let filter = window_filter(&params, &["deviceId", "valueType"]);
        assert_eq!(filter.get_str("deviceId").ok(), Some("d1"));
        assert_eq!(filter.get_str("valueType").ok(), Some("temp"));
    }

    #[test]
    fn test_unreferenced_params_do_not_leak_into_filter() {
        let mut params = window(10, 20);
        params.insert("value".to_string(), ParamValue::Number(5.0));
        params.insert("$where".to_string(), ParamValue::text("1"));

        let filter = window_filter(&params, &["deviceId", "valueType"]);
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_windowed_fetch_shape() {
        let stages = windowed_fetch(&window(0, 1), RAW_ROW_LIMIT);
        let operators: Vec<_> = stages.iter().map(Stage::operator).collect();
        assert_eq!(operators, vec!["$match", "$project", "$limit"]);
        assert_eq!(stages[2], Stage::Limit(1000));

        if let Stage::Project(projection) = &stages[1] {
            assert_eq!(projection.get_i32("_id").ok(), Some(0));
            for field in WINDOW_FIELDS {
                assert!(projection.contains_key(field));
            }
        } else {
            panic!("expected projection stage");
        }
    }

    #[test]
    fn test_count_shape_and_empty_result() {
        let stages = PipelineTemplate::WindowedCount.build(&window(0, 1));
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].to_document(), doc! { "$count": "count" });
        assert_eq!(
            PipelineTemplate::WindowedCount.empty_result(),
            Some(doc! { "count": 0 })
        );
        assert!(PipelineTemplate::Pivot.empty_result().is_none());
    }

    #[test]
    fn test_pivot_ignores_value_type() {
        let mut params = window(0, 1);
        params.insert("valueType".to_string(), ParamValue::text("temp"));
        let stages = pivot(&params);

        assert_eq!(stages.len(), 7);
        let Stage::Match(filter) = &stages[0] else {
            panic!("pivot must start with $match, got {:?}", stages[0]);
        };
        assert!(!filter.contains_key("valueType"));
        assert_eq!(filter.get_str("deviceId").ok(), None);
        assert_eq!(
            stages[5].to_document(),
            doc! { "$replaceRoot": { "newRoot": "$combined" } }
        );
        assert_eq!(stages[6], Stage::Sort(doc! { "validAt": 1 }));
    }

    #[test]
    fn test_custom_template() {
        fn latest(params: &ParameterSet) -> Vec<Stage> {
            vec![
                Stage::Match(window_filter(params, &["deviceId"])),
                Stage::Sort(doc! { "validAt": -1 }),
                Stage::Limit(1),
            ]
        }

        let stages = PipelineTemplate::Custom(latest).build(&window(0, 1));
        assert_eq!(stages.len(), 3);
        assert_eq!(to_documents(&stages)[2], doc! { "$limit": 1_i64 });
    }
}
