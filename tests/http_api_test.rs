// HTTP API 集成测试
//
// 通过 actix_web::test 直接驱动路由，存储使用内存实现
//
// 运行：cargo test --test http_api_test

mod common;

use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use common::*;
use iotsrv_query::query::{QueryExecutor, Stage};
use iotsrv_query::service::http::handlers::AppState;
use iotsrv_query::service::http::routes;
use iotsrv_query::storage::{DocumentStore, MemoryStore, StoreError};
use iotsrv_query::utils::config::QueryConfig;
use iotsrv_query::QueryRegistry;
use mongodb::bson::Document;
use serde_json::{json, Value};
use std::sync::Arc;

/// 始终失败的存储
struct FailingStore;

#[async_trait]
impl DocumentStore for FailingStore {
    async fn aggregate(&self, _: &str, _: &[Stage]) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Connection("server selection timeout".to_string()))
    }

    async fn find(&self, _: &str, _: Document, _: Document) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Query("cursor killed".to_string()))
    }
}

fn state_with(executor: QueryExecutor) -> web::Data<Arc<AppState>> {
    web::Data::new(Arc::new(AppState::new(executor, "iotsrv-test")))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state).configure(routes::configure)).await
    };
}

async fn get_json(uri: &str) -> (StatusCode, Value) {
    let app = app!(state_with(executor_with(seeded_store())));
    let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
    let status = resp.status();
    let body: Value = test::read_body_json(resp).await;
    (status, body)
}

// ═══════════════════════════════════════════════════════════════════════════
// 原始过滤查询
// ═══════════════════════════════════════════════════════════════════════════

#[actix_web::test]
async fn test_values_with_malformed_filter() {
    let (status, body) = get_json("/values?q=not-json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({ "error": "Invalid query string. Must be a valid JSON object." })
    );
}

#[actix_web::test]
async fn test_values_with_non_object_filter() {
    let (status, _) = get_json("/values?q=%5B1%2C2%5D").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_values_without_filter() {
    for uri in ["/values", "/values?q=", "/log"] {
        let (status, body) = get_json(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri={}", uri);
        assert_eq!(body["error"], "Missing query string parameter \"q\"");
    }
}

#[actix_web::test]
async fn test_values_returns_projected_rows() {
    // q={"deviceId":"d1"}
    let (status, body) = get_json("/values?q=%7B%22deviceId%22%3A%22d1%22%7D").await;
    assert_eq!(status, StatusCode::OK);

    let rows = body.as_array().unwrap();
    // 窗口内 10 条 + 40 天前 1 条 + 未来 1 条，原始查询没有时间窗口
    assert_eq!(rows.len(), 12);
    for row in rows {
        let mut keys: Vec<&str> = row.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["deviceId", "validAt", "value", "valueType"]);
        assert_eq!(row["deviceId"], "d1");
    }
}

#[actix_web::test]
async fn test_log_collection() {
    // q={"level":"error"}
    let (status, body) = get_json("/log?q=%7B%22level%22%3A%22error%22%7D").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{ "validAt": NOW - 2 * HOUR, "deviceId": "d2", "valueType": "event", "value": "fault" }])
    );

    let (status, body) = get_json("/log?q=%7B%7D").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// 命名查询
// ═══════════════════════════════════════════════════════════════════════════

#[actix_web::test]
async fn test_aggregated_values_routes() {
    let (status, body) = get_json("/aggregated-values").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len() as i64, IN_WINDOW);

    let (status, body) = get_json("/aggregated-values/count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "count": IN_WINDOW }]));

    let (status, body) = get_json("/aggregated-values/count?deviceId=d3&valueType=hum").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "count": 2 }]));

    let (status, body) = get_json("/aggregated-values/per-device?deviceId=d2").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r["temp"].is_number() && r["hum"].is_number()));
}

#[actix_web::test]
async fn test_generic_query_route_matches_aliases() {
    let (_, alias) = get_json("/aggregated-values/count?valueType=temp").await;
    let (status, generic) = get_json("/queries/valuesCnt?valueType=temp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alias, generic);
    assert_eq!(generic, json!([{ "count": 15 }]));
}

#[actix_web::test]
async fn test_count_on_empty_collection() {
    let app = app!(state_with(executor_with(MemoryStore::new())));
    let req = test::TestRequest::get().uri("/aggregated-values/count").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!([{ "count": 0 }]));
}

#[actix_web::test]
async fn test_unknown_named_query() {
    let (status, body) = get_json("/queries/valuesByMoon").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Unknown query: valuesByMoon" }));
}

#[actix_web::test]
async fn test_list_queries() {
    let (status, body) = get_json("/queries").await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["values", "valuesCnt", "valuesPerDevice"]);
    assert_eq!(body[0]["shape"], "fetch");
    assert_eq!(body[0]["collection"], "values");
    assert_eq!(body[2]["parameters"]["validAtStart"], 0);
}

#[actix_web::test]
async fn test_health_and_fallback() {
    let (status, body) = get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "ok", "service": "iotsrv-test", "queries": 3 })
    );

    let (status, body) = get_json("/devices").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

// ═══════════════════════════════════════════════════════════════════════════
// 存储故障
// ═══════════════════════════════════════════════════════════════════════════

#[actix_web::test]
async fn test_store_failure_is_hidden_from_client() {
    let registry = Arc::new(QueryRegistry::builtin(NOW, &QueryConfig::default()));
    let executor = QueryExecutor::new(registry, Arc::new(FailingStore));
    let app = app!(state_with(executor));

    for uri in ["/aggregated-values", "/queries/valuesPerDevice", "/values?q=%7B%7D"] {
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR, "uri={}", uri);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "error": "Failed to execute query" }));
    }
}
