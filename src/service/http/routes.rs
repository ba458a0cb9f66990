//! HTTP API 路由配置

use actix_web::{error, web, HttpResponse};

use super::handlers;
use super::models::ErrorBody;

/// 配置所有路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // 查询字符串无法解码时同样返回 JSON 错误体
        .app_data(web::QueryConfig::default().error_handler(|err, _req| {
            let body = ErrorBody::new(format!("Invalid query string: {}", err));
            error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
        }))

        // 健康检查
        .route("/health", web::get().to(handlers::health_check))

        // 原始过滤查询
        .route("/values", web::get().to(handlers::query_values))
        .route("/log", web::get().to(handlers::query_log))

        // 命名查询
        .route("/aggregated-values", web::get().to(handlers::aggregated_values))
        .route(
            "/aggregated-values/count",
            web::get().to(handlers::aggregated_values_count),
        )
        .route(
            "/aggregated-values/per-device",
            web::get().to(handlers::aggregated_values_per_device),
        )
        .service(
            web::scope("/queries")
                .route("", web::get().to(handlers::list_queries))
                .route("/{name}", web::get().to(handlers::run_named_query)),
        )
        .default_service(web::route().to(handlers::not_found));
}
