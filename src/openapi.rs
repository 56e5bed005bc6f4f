use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// 为 Swagger UI 提供正确的“业务接口前缀”Servers 配置。
///
/// - 字符画接口默认前缀为 `/api`（对应 `config.api.prefix` / `APP_API__PREFIX`）。
/// - `/health` 不带前缀，因此额外提供 `/` 作为备用 server。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("字符画接口（默认 /api）"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api")
                    .description(Some("接口前缀：对应 config.api.prefix")),
            )
            .build();

        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（/health）"))
            .build();

        openapi.servers = Some(vec![api, root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::art::handler::list_cache,
        crate::features::art::handler::get_post_art,
        crate::features::art::handler::get_preview_art,
    ),
    components(schemas(
        crate::error::ProblemDetails,
        crate::features::health::handler::HealthResponse,
    )),
    modifiers(&ApiServers),
    tags(
        (name = "Art", description = "ANSI 字符画接口"),
        (name = "Health", description = "健康检查"),
    ),
    info(
        title = "e26D API",
        version = "0.1.0",
        description = "e621 post → ANSI 字符画缓存网关 (Axum)"
    )
)]
pub struct ApiDoc;
