//! 查询参数：类型转换与合并
//!
//! 查询字符串中的值一律是文本，按以下顺序转换：
//! 1. 能解析为数字 → `Number`
//! 2. 能解析为日期时间 → `Timestamp`（毫秒时间戳）
//! 3. 否则原样保留 → `Text`
//!
//! 数字优先：全数字的设备标识（如 `"0042"`）会被转成数字 `42`，
//! 而存储中的 `deviceId` 若是字符串，等值过滤将匹配不到。
//! 需要按字符串匹配的标识应避免纯数字。

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use mongodb::bson::Bson;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// 参数值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// 无过滤
    Null,
    /// 数值
    Number(f64),
    /// 毫秒时间戳（UTC）
    Timestamp(i64),
    /// 原始文本
    Text(String),
}

/// 参数名 → 参数值
pub type ParameterSet = BTreeMap<String, ParamValue>;

impl ParamValue {
    pub fn text(value: impl Into<String>) -> Self {
        ParamValue::Text(value.into())
    }

    /// 是否作为过滤条件生效
    ///
    /// `Null`、空字符串、数值 0 视为未设置
    pub fn is_set(&self) -> bool {
        match self {
            ParamValue::Null => false,
            ParamValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ParamValue::Timestamp(ms) => *ms != 0,
            ParamValue::Text(s) => !s.is_empty(),
        }
    }

    /// 转换为 BSON，整数值统一为 Int64，与存储中的毫秒时间戳同型
    pub fn to_bson(&self) -> Bson {
        match self {
            ParamValue::Null => Bson::Null,
            ParamValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Bson::Int64(*n as i64)
                } else {
                    Bson::Double(*n)
                }
            }
            ParamValue::Timestamp(ms) => Bson::Int64(*ms),
            ParamValue::Text(s) => Bson::String(s.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Timestamp(ms) => write!(f, "{}", ms),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 类型转换
// ═══════════════════════════════════════════════════════════════════════════

/// 将查询字符串中的原始值转换为参数值，从不失败
pub fn coerce(raw: &str) -> ParamValue {
    if let Some(n) = parse_number(raw) {
        return ParamValue::Number(n);
    }
    if let Some(ms) = parse_timestamp(raw) {
        return ParamValue::Timestamp(ms);
    }
    ParamValue::Text(raw.to_string())
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// 带时区偏移的日期时间（`+08:00`、`+0800`、`+08`、`Z`）
const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M%#z",
];

/// 不带时区的日期时间按 UTC 解释
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

fn parse_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.timestamp_millis());
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Some(dt.timestamp_millis());
        }
    }

    // `Z` 后缀即 UTC
    let naive_text = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
        .unwrap_or(trimmed);
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_text, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return midnight_utc(date);
        }
    }

    parse_year_month(trimmed).and_then(midnight_utc)
}

fn midnight_utc(date: NaiveDate) -> Option<i64> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// `YYYY-MM` → 当月 1 日
fn parse_year_month(text: &str) -> Option<NaiveDate> {
    let (year, month) = text.split_once('-')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

// ═══════════════════════════════════════════════════════════════════════════
// 参数合并
// ═══════════════════════════════════════════════════════════════════════════

/// 默认参数 + 调用方覆盖
///
/// 覆盖值逐个转换后写入，同名键后写覆盖前写。
/// 不校验键名：未知键原样进入结果，管道不引用时即被忽略。
pub fn merge<I, K, V>(defaults: &ParameterSet, overrides: I) -> ParameterSet
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: AsRef<str>,
{
    let mut params = defaults.clone();
    for (key, value) in overrides {
        params.insert(key.into(), coerce(value.as_ref()));
    }
    params
}
