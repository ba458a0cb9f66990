// 集成测试共用数据
//
// 固定时钟 NOW，数据集：
// - 5 个整点 × 3 台设备 × {temp, hum}，d3 在偶数步缺少 hum → 窗口内 27 条
// - 40 天前 1 条（仅透视查询的默认窗口覆盖）
// - NOW 之后 1 条（任何默认窗口都不覆盖）

#![allow(dead_code)]

use iotsrv_query::storage::MemoryStore;
use iotsrv_query::utils::config::QueryConfig;
use iotsrv_query::{QueryExecutor, QueryRegistry};
use mongodb::bson::{doc, Document};
use std::sync::Arc;

pub const NOW: i64 = 1_717_200_000_000;
pub const HOUR: i64 = 60 * 60 * 1000;
pub const DAY: i64 = 24 * HOUR;

pub const DEVICES: [&str; 3] = ["d1", "d2", "d3"];

/// 默认窗口内的读数条数
pub const IN_WINDOW: i64 = 27;

pub fn reading(valid_at: i64, device: &str, value_type: &str, value: f64) -> Document {
    doc! {
        "validAt": valid_at,
        "receivedAt": valid_at + 50,
        "deviceId": device,
        "valueType": value_type,
        "value": value,
        "source": "gateway-1",
    }
}

pub fn dataset() -> Vec<Document> {
    let mut docs = Vec::new();
    for step in 0..5_i64 {
        let valid_at = NOW - (step + 1) * HOUR;
        for (i, device) in DEVICES.iter().enumerate() {
            for value_type in ["temp", "hum"] {
                if *device == "d3" && value_type == "hum" && step % 2 == 0 {
                    continue;
                }
                docs.push(reading(valid_at, device, value_type, 10.0 * i as f64 + step as f64));
            }
        }
    }
    docs.push(reading(NOW - 40 * DAY, "d1", "temp", -1.0));
    docs.push(reading(NOW + HOUR, "d1", "temp", 99.0));
    docs
}

pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_many("values", dataset());
    store.insert_many(
        "log",
        vec![
            doc! { "validAt": NOW - HOUR, "deviceId": "d1", "valueType": "event", "value": "boot", "level": "info" },
            doc! { "validAt": NOW - 2 * HOUR, "deviceId": "d2", "valueType": "event", "value": "fault", "level": "error" },
        ],
    );
    store
}

pub fn executor_with(store: MemoryStore) -> QueryExecutor {
    let registry = Arc::new(QueryRegistry::builtin(NOW, &QueryConfig::default()));
    QueryExecutor::new(registry, Arc::new(store)).with_clock(|| NOW)
}

pub fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
