//! 进程内文档存储
//!
//! 实现本服务用到的聚合管道子集，语义与 MongoDB 保持一致：
//! - `$match`：字段等值、`$eq/$ne/$gt/$gte/$lt/$lte/$in/$nin/$exists`、`$and/$or/$nor`
//! - `$project`：包含 / 排除 / 字段路径表达式
//! - `$group`：复合 `_id`，`$push/$sum/$first/$last` 累加器
//! - `$set`、`$replaceRoot`：`$arrayToObject`、`$mergeObjects`、`$literal`
//! - `$sort`、`$limit`、`$count`
//!
//! 数值跨 Int32/Int64/Double 比较；无匹配时 `$count` 不输出任何行。

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::{DocumentStore, StoreError};
use crate::query::pipeline::Stage;

/// 进程内文档存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文件加载初始数据
    pub fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::Connection(format!("Failed to read seed file {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// `{"<collection>": [<document>, ...], ...}`
    pub fn from_json(content: &str) -> Result<Self, StoreError> {
        let collections: HashMap<String, Vec<serde_json::Map<String, serde_json::Value>>> =
            serde_json::from_str(content)
                .map_err(|e| StoreError::Decode(format!("Invalid seed data: {}", e)))?;

        let store = Self::new();
        for (name, documents) in collections {
            let documents = documents
                .iter()
                .map(|d| {
                    mongodb::bson::to_document(d).map_err(|e| StoreError::Decode(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            log::info!("Seeded collection '{}' with {} documents", name, documents.len());
            store.insert_many(&name, documents);
        }
        Ok(store)
    }

    /// 追加文档（仅用于填充数据，服务本身只读）
    pub fn insert_many<I>(&self, collection: &str, documents: I)
    where
        I: IntoIterator<Item = Document>,
    {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.snapshot(collection);
        for stage in pipeline {
            docs = apply_stage(stage, docs)?;
        }
        Ok(docs)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Document,
    ) -> Result<Vec<Document>, StoreError> {
        let matched = filter_documents(self.snapshot(collection), &filter)?;
        if projection.is_empty() {
            return Ok(matched);
        }
        matched.iter().map(|d| project(d, &projection)).collect()
    }
}

fn query_error(message: impl Into<String>) -> StoreError {
    StoreError::Query(message.into())
}

/// 对文档序列执行单个阶段
pub fn apply_stage(stage: &Stage, docs: Vec<Document>) -> Result<Vec<Document>, StoreError> {
    match stage {
        Stage::Match(filter) => filter_documents(docs, filter),
        Stage::Project(spec) => docs.iter().map(|d| project(d, spec)).collect(),
        Stage::Group(spec) => group(&docs, spec),
        Stage::Set(spec) => docs.into_iter().map(|d| set_fields(d, spec)).collect(),
        Stage::ReplaceRoot(expr) => docs.iter().map(|d| replace_root(d, expr)).collect(),
        Stage::Count(field) => {
            if docs.is_empty() {
                return Ok(Vec::new());
            }
            let mut out = Document::new();
            out.insert(field.clone(), int_bson(docs.len() as i64));
            Ok(vec![out])
        }
        Stage::Limit(n) => {
            if *n <= 0 {
                return Err(query_error("the limit must be positive"));
            }
            let mut docs = docs;
            docs.truncate(*n as usize);
            Ok(docs)
        }
        Stage::Sort(spec) => sort(docs, spec),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 值比较
// ═══════════════════════════════════════════════════════════════════════════

/// 按点分路径取字段
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn int_bson(n: i64) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(n),
    }
}

/// 同类型之间的比较，类型不同返回 `None`
fn compare_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_integer(a), as_integer(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(_), Some(_)) => compare_bson(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// 字段等值，缺失字段等于 null，数组字段任一元素相等即匹配
fn field_equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn field_compare(value: Option<&Bson>, operand: &Bson, accept: &[Ordering]) -> bool {
    value
        .and_then(|actual| compare_bson(actual, operand))
        .map_or(false, |ord| accept.contains(&ord))
}

/// 排序用的类型序
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 1,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 2,
        Some(Bson::String(_)) | Some(Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        _ => 11,
    }
}

fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_bson(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// $match
// ═══════════════════════════════════════════════════════════════════════════

fn filter_documents(docs: Vec<Document>, filter: &Document) -> Result<Vec<Document>, StoreError> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        if matches(&doc, filter)? {
            out.push(doc);
        }
    }
    Ok(out)
}

/// 文档是否满足过滤条件（各条件为 AND 关系）
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" {
                    any
                } else {
                    !any
                }
            }
            op if op.starts_with('$') => {
                return Err(query_error(format!("unknown top level operator: {}", op)))
            }
            path => matches_field(get_path(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Bson) -> Result<Vec<&'a Document>, StoreError> {
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(sub) => Ok(sub),
                _ => Err(query_error(format!("{} entries must be objects", op))),
            })
            .collect(),
        _ => Err(query_error(format!("{} must be a nonempty array", op))),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().map_or(false, |k| k.starts_with('$'))
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> Result<bool, StoreError> {
    let operators = match condition {
        Bson::Document(ops) if is_operator_document(ops) => ops,
        _ => return Ok(field_equals(value, condition)),
    };

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => field_equals(value, operand),
            "$ne" => !field_equals(value, operand),
            "$gt" => field_compare(value, operand, &[Ordering::Greater]),
            "$gte" => field_compare(value, operand, &[Ordering::Greater, Ordering::Equal]),
            "$lt" => field_compare(value, operand, &[Ordering::Less]),
            "$lte" => field_compare(value, operand, &[Ordering::Less, Ordering::Equal]),
            "$in" | "$nin" => {
                let candidates = match operand {
                    Bson::Array(items) => items,
                    _ => return Err(query_error(format!("{} needs an array", op))),
                };
                let found = candidates.iter().any(|c| field_equals(value, c));
                if op == "$in" {
                    found
                } else {
                    !found
                }
            }
            "$exists" => {
                let wanted = match operand {
                    Bson::Boolean(b) => *b,
                    other => as_number(other).map_or(true, |n| n != 0.0),
                };
                value.is_some() == wanted
            }
            other => return Err(query_error(format!("unknown operator: {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

// ═══════════════════════════════════════════════════════════════════════════
// 表达式
// ═══════════════════════════════════════════════════════════════════════════

/// 计算表达式，字段缺失时返回 `None`
pub fn evaluate(expr: &Bson, doc: &Document) -> Result<Option<Bson>, StoreError> {
    match expr {
        Bson::String(s) if s.starts_with("$$") => {
            Err(query_error(format!("unsupported variable: {}", s)))
        }
        Bson::String(s) if s.starts_with('$') => Ok(get_path(doc, &s[1..]).cloned()),
        Bson::Document(inner) if inner.len() == 1 && is_operator_document(inner) => {
            // len == 1 已保证存在首个键值
            match inner.iter().next() {
                Some((op, arg)) => evaluate_operator(op, arg, doc),
                None => Ok(None),
            }
        }
        Bson::Document(inner) => {
            let mut out = Document::new();
            for (key, value) in inner {
                if let Some(v) = evaluate(value, doc)? {
                    out.insert(key.clone(), v);
                }
            }
            Ok(Some(Bson::Document(out)))
        }
        Bson::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, doc)?.unwrap_or(Bson::Null));
            }
            Ok(Some(Bson::Array(out)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn evaluate_operator(op: &str, arg: &Bson, doc: &Document) -> Result<Option<Bson>, StoreError> {
    match op {
        "$literal" => Ok(Some(arg.clone())),
        "$arrayToObject" => match evaluate(arg, doc)? {
            None | Some(Bson::Null) => Ok(Some(Bson::Null)),
            Some(Bson::Array(pairs)) => array_to_object(&pairs).map(|d| Some(Bson::Document(d))),
            Some(other) => Err(query_error(format!(
                "$arrayToObject requires an array input, found: {}",
                other
            ))),
        },
        "$mergeObjects" => {
            let parts = match arg {
                Bson::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            let mut merged = Document::new();
            for part in &parts {
                match evaluate(part, doc)? {
                    None | Some(Bson::Null) => {}
                    Some(Bson::Document(fields)) => {
                        for (key, value) in fields {
                            merged.insert(key, value);
                        }
                    }
                    Some(other) => {
                        return Err(query_error(format!(
                            "$mergeObjects requires object inputs, found: {}",
                            other
                        )))
                    }
                }
            }
            Ok(Some(Bson::Document(merged)))
        }
        other => Err(query_error(format!("unsupported expression operator: {}", other))),
    }
}

/// `[{k, v}, ...]` 或 `[[k, v], ...]` → 对象，同名键后者覆盖前者
fn array_to_object(pairs: &[Bson]) -> Result<Document, StoreError> {
    let mut out = Document::new();
    for pair in pairs {
        let (key, value) = match pair {
            Bson::Document(kv) => (kv.get("k"), kv.get("v")),
            Bson::Array(kv) if kv.len() == 2 => (kv.first(), kv.get(1)),
            _ => {
                return Err(query_error(
                    "$arrayToObject requires an array of key-value pairs",
                ))
            }
        };
        match key {
            Some(Bson::String(k)) => {
                out.insert(k.clone(), value.cloned().unwrap_or(Bson::Null));
            }
            _ => {
                return Err(query_error(
                    "$arrayToObject requires an object key of type string",
                ))
            }
        }
    }
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// $project / $set / $replaceRoot
// ═══════════════════════════════════════════════════════════════════════════

fn is_flag(value: &Bson) -> bool {
    matches!(
        value,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_)
    )
}

fn is_exclude_flag(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => !b,
        other => as_number(other) == Some(0.0),
    }
}

fn is_include_flag(value: &Bson) -> bool {
    is_flag(value) && !is_exclude_flag(value)
}

/// 投影：含任一非 `_id` 包含项时为包含模式，否则为排除模式
pub fn project(doc: &Document, spec: &Document) -> Result<Document, StoreError> {
    let inclusion = spec
        .iter()
        .any(|(key, value)| key != "_id" && !is_exclude_flag(value));

    if !inclusion {
        let mut out = doc.clone();
        for (key, value) in spec {
            if is_exclude_flag(value) {
                out.remove(key);
            }
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let exclude_id = spec.get("_id").map_or(false, is_exclude_flag);
    if !exclude_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }

    // 保留字段按原文档顺序输出
    for (key, value) in doc {
        if key != "_id" && spec.get(key).map_or(false, is_include_flag) {
            out.insert(key.clone(), value.clone());
        }
    }

    for (key, expr) in spec {
        if is_flag(expr) {
            continue;
        }
        if let Some(value) = evaluate(expr, doc)? {
            out.insert(key.clone(), value);
        }
    }

    Ok(out)
}

fn set_fields(mut doc: Document, spec: &Document) -> Result<Document, StoreError> {
    let source = doc.clone();
    for (field, expr) in spec {
        if let Some(value) = evaluate(expr, &source)? {
            doc.insert(field.clone(), value);
        }
    }
    Ok(doc)
}

fn replace_root(doc: &Document, expr: &Bson) -> Result<Document, StoreError> {
    match evaluate(expr, doc)? {
        Some(Bson::Document(root)) => Ok(root),
        other => Err(query_error(format!(
            "'newRoot' expression must evaluate to an object, but resulting value was: {}",
            other.unwrap_or(Bson::Null)
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// $group / $sort
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
enum Accumulator {
    Push,
    Sum,
    First,
    Last,
}

fn parse_accumulator<'a>(
    field: &'a str,
    spec: &'a Bson,
) -> Result<(&'a str, Accumulator, &'a Bson), StoreError> {
    let (op, expr) = match spec {
        Bson::Document(inner) if inner.len() == 1 => match inner.iter().next() {
            Some(entry) => entry,
            None => return Err(query_error(format!("invalid accumulator for '{}'", field))),
        },
        _ => {
            return Err(query_error(format!(
                "the field '{}' must be an accumulator object",
                field
            )))
        }
    };
    let accumulator = match op.as_str() {
        "$push" => Accumulator::Push,
        "$sum" => Accumulator::Sum,
        "$first" => Accumulator::First,
        "$last" => Accumulator::Last,
        other => return Err(query_error(format!("unknown group operator '{}'", other))),
    };
    Ok((field, accumulator, expr))
}

fn add_numbers(total: &Bson, value: &Bson) -> Bson {
    match (as_integer(total), as_integer(value)) {
        (Some(a), Some(b)) => match a.checked_add(b) {
            Some(sum) => int_bson(sum),
            None => Bson::Double(a as f64 + b as f64),
        },
        _ => match (as_number(total), as_number(value)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => total.clone(),
        },
    }
}

fn group(docs: &[Document], spec: &Document) -> Result<Vec<Document>, StoreError> {
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| query_error("a group specification must include an _id"))?;
    let accumulators = spec
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .map(|(field, acc)| parse_accumulator(field, acc))
        .collect::<Result<Vec<_>, _>>()?;

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Document> = Vec::new();

    for doc in docs {
        let key = evaluate(id_expr, doc)?.unwrap_or(Bson::Null);
        let canonical = key.clone().into_relaxed_extjson().to_string();

        let (slot, is_new) = match index.get(&canonical).copied() {
            Some(slot) => (slot, false),
            None => {
                let mut fresh = Document::new();
                fresh.insert("_id", key);
                for (field, accumulator, _) in &accumulators {
                    match accumulator {
                        Accumulator::Push => {
                            fresh.insert(*field, Bson::Array(Vec::new()));
                        }
                        Accumulator::Sum => {
                            fresh.insert(*field, Bson::Int32(0));
                        }
                        Accumulator::First | Accumulator::Last => {}
                    }
                }
                groups.push(fresh);
                index.insert(canonical, groups.len() - 1);
                (groups.len() - 1, true)
            }
        };

        let current = &mut groups[slot];
        for (field, accumulator, expr) in &accumulators {
            let value = evaluate(expr, doc)?;
            match accumulator {
                Accumulator::Push => {
                    if let (Some(v), Ok(items)) = (value, current.get_array_mut(*field)) {
                        items.push(v);
                    }
                }
                Accumulator::Sum => {
                    if let Some(v) = value.filter(|v| as_number(v).is_some()) {
                        let total = current.get(*field).cloned().unwrap_or(Bson::Int32(0));
                        current.insert(*field, add_numbers(&total, &v));
                    }
                }
                Accumulator::First => {
                    if is_new {
                        current.insert(*field, value.unwrap_or(Bson::Null));
                    }
                }
                Accumulator::Last => {
                    current.insert(*field, value.unwrap_or(Bson::Null));
                }
            }
        }
    }

    Ok(groups)
}

fn sort(mut docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    let keys = spec
        .iter()
        .map(|(key, direction)| match as_number(direction) {
            Some(d) if d == 1.0 => Ok((key.clone(), true)),
            Some(d) if d == -1.0 => Ok((key.clone(), false)),
            _ => Err(query_error(format!("$sort key ordering must be 1 or -1: {}", key))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if keys.is_empty() {
        return Err(query_error("$sort stage must have at least one sort key"));
    }

    docs.sort_by(|a, b| {
        for (key, ascending) in &keys {
            let ord = sort_order(get_path(a, key), get_path(b, key));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}
