use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// `healthy`，或调度器已停止时为 `degraded`
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "e26d")]
    pub service: String,
    #[schema(example = "0.1.0")]
    pub version: String,
    /// 缓存根目录
    #[schema(example = "./database/posts")]
    pub cache_root: String,
    /// 出站调度器是否仍接收新操作
    pub upstream_available: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "返回服务版本、缓存根目录与出站调度器状态；调度器停止后返回 503。",
    responses(
        (status = 200, description = "服务健康", body = HealthResponse),
        (status = 503, description = "调度器已停止，缓存未命中的请求无法完成", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let upstream_available = state.cache.upstream_available();
    let (code, status) = if upstream_available {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            service: "e26d".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_root: state.cache.layout().root().display().to_string(),
            upstream_available,
        }),
    )
}
