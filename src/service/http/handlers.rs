//! HTTP API 请求处理器

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Result};
use std::sync::Arc;

use super::models::*;
use crate::query::executor::QueryExecutor;
use crate::query::registry::{VALUES, VALUES_COUNT, VALUES_PER_DEVICE};
use crate::QueryError;

/// 应用状态
pub struct AppState {
    pub executor: QueryExecutor,
    pub service_name: String,
}

impl AppState {
    pub fn new(executor: QueryExecutor, service_name: impl Into<String>) -> Self {
        Self {
            executor,
            service_name: service_name.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 错误映射
// ═══════════════════════════════════════════════════════════════════════════

pub fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::MissingParameter(_) | QueryError::MalformedFilter(_) => StatusCode::BAD_REQUEST,
        QueryError::UnknownQuery(_) => StatusCode::NOT_FOUND,
        QueryError::ExecutionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 返回给客户端的错误信息，存储层细节只写日志
pub fn client_message(err: &QueryError) -> String {
    match err {
        QueryError::MissingParameter(name) => {
            format!("Missing query string parameter \"{}\"", name)
        }
        QueryError::MalformedFilter(_) => {
            "Invalid query string. Must be a valid JSON object.".to_string()
        }
        QueryError::UnknownQuery(name) => format!("Unknown query: {}", name),
        QueryError::ExecutionFailed(_) => "Failed to execute query".to_string(),
    }
}

pub fn error_response(err: &QueryError) -> HttpResponse {
    let status = status_for(err);
    if status.is_server_error() {
        log::error!("Request failed: {}", err);
    } else {
        log::warn!("Request rejected: {}", err);
    }
    HttpResponse::build(status).json(ErrorBody::new(client_message(err)))
}

// ═══════════════════════════════════════════════════════════════════════════
// 处理器
// ═══════════════════════════════════════════════════════════════════════════

/// 健康检查
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok",
        service: state.service_name.clone(),
        queries: state.executor.registry().len(),
    })
}

/// 已注册的命名查询
///
/// GET /queries
pub async fn list_queries(state: web::Data<Arc<AppState>>) -> Result<HttpResponse> {
    let descriptors: Vec<QueryDescriptor> = state
        .executor
        .registry()
        .definitions()
        .into_iter()
        .map(QueryDescriptor::from)
        .collect();
    Ok(HttpResponse::Ok().json(descriptors))
}

/// 执行任意命名查询
///
/// GET /queries/{name}?validAtStart=...&deviceId=...
pub async fn run_named_query(
    name: web::Path<String>,
    params: web::Query<Vec<(String, String)>>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    Ok(respond_named(&state, &name, params.into_inner()).await)
}

/// GET /aggregated-values
pub async fn aggregated_values(
    params: web::Query<Vec<(String, String)>>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    Ok(respond_named(&state, VALUES, params.into_inner()).await)
}

/// GET /aggregated-values/count
pub async fn aggregated_values_count(
    params: web::Query<Vec<(String, String)>>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    Ok(respond_named(&state, VALUES_COUNT, params.into_inner()).await)
}

/// GET /aggregated-values/per-device
pub async fn aggregated_values_per_device(
    params: web::Query<Vec<(String, String)>>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    Ok(respond_named(&state, VALUES_PER_DEVICE, params.into_inner()).await)
}

/// GET /values?q=<json>
pub async fn query_values(
    query: web::Query<LegacyQuery>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    Ok(respond_legacy(&state, "values", query.q.as_deref()).await)
}

/// GET /log?q=<json>
pub async fn query_log(
    query: web::Query<LegacyQuery>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    Ok(respond_legacy(&state, "log", query.q.as_deref()).await)
}

/// 未匹配的路由
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("Not found"))
}

async fn respond_named(state: &AppState, name: &str, params: Vec<(String, String)>) -> HttpResponse {
    match state.executor.execute(name, params).await {
        Ok(rows) => {
            log::debug!("Query '{}' returned {} rows", name, rows.len());
            HttpResponse::Ok().json(rows_to_json(rows))
        }
        Err(e) => error_response(&e),
    }
}

async fn respond_legacy(state: &AppState, collection: &str, q: Option<&str>) -> HttpResponse {
    log::info!("Received query for collection {}: {:?}", collection, q);
    match state.executor.find_raw(collection, q).await {
        Ok(rows) => HttpResponse::Ok().json(rows_to_json(rows)),
        Err(e) => error_response(&e),
    }
}
