use std::path::Path;

use axum::{Router, routing::get};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::access_log::access_log_middleware;
use crate::features::{art::create_art_router, health::handler::health_check};
use crate::openapi::ApiDoc;
use crate::state::AppState;

pub(crate) fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 字符画 HTML 与 JSON 压缩收益明显；图片与流式响应不压缩
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

/// 组装完整路由：`{api_prefix}` 下的字符画接口、`/health`、`/docs` 与静态前端
pub fn build_router(state: AppState, api_prefix: &str, web_dir: &Path) -> Router {
    Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest(api_prefix, create_art_router())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback_service(ServeDir::new(web_dir))
        .with_state(state)
        // 只编译了 gzip 编码器：即使客户端同时声明 br，也只会返回 gzip 或明文
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
        .layer(axum::middleware::from_fn(access_log_middleware))
}
