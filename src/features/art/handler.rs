use std::path::PathBuf;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, ProblemDetails},
    features::cache::{ArtKind, PostId},
    state::AppState,
};

use super::transcoder;

/// 字符画片段的外层容器
const ART_WRAPPER_OPEN: &str = "<div style=\"white-space:pre;overflow-x:auto;\">";
const ART_WRAPPER_CLOSE: &str = "</div>";

/// 渲染结果不可变，允许客户端长期缓存
const ART_CACHE_CONTROL: &str = "max-age=86400";

#[utoipa::path(
    get,
    path = "/listCache",
    summary = "列出已缓存的 post",
    description = "返回缓存目录中同时具备数字目录名与元数据文件的 post id（顺序即目录遍历顺序）。",
    responses((status = 200, description = "已缓存的 post id 列表", body = [u64])),
    tag = "Art"
)]
pub async fn list_cache(State(state): State<AppState>) -> impl IntoResponse {
    let ids = state.cache.list_cached_ids().await;
    debug!("listCache 返回 {} 个 id", ids.len());
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Json(ids),
    )
}

#[utoipa::path(
    get,
    path = "/post/{id}",
    summary = "获取原图字符画",
    description = "命中缓存直接返回；否则拉取元数据与原图，调用外部渲染器并转换为 HTML 后持久化。",
    params(("id" = String, Path, description = "post id（正整数）")),
    responses(
        (status = 200, description = "字符画 HTML 片段", body = String, content_type = "text/html"),
        (status = 400, description = "非法的 post id", body = ProblemDetails, content_type = "application/problem+json"),
        (status = 404, description = "上游不存在该 post 或缺少图片地址", body = ProblemDetails, content_type = "application/problem+json"),
        (status = 500, description = "渲染或磁盘写入失败", body = ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Art"
)]
pub async fn get_post_art(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    serve_art(state, &raw_id, ArtKind::Full).await
}

#[utoipa::path(
    get,
    path = "/previewImage/post/{id}",
    summary = "获取预览图字符画",
    description = "与 /post/{id} 语义相同，但以预览图为渲染输入。",
    params(("id" = String, Path, description = "post id（正整数）")),
    responses(
        (status = 200, description = "字符画 HTML 片段", body = String, content_type = "text/html"),
        (status = 400, description = "非法的 post id", body = ProblemDetails, content_type = "application/problem+json"),
        (status = 404, description = "上游不存在该 post 或缺少预览图地址", body = ProblemDetails, content_type = "application/problem+json"),
        (status = 500, description = "渲染或磁盘写入失败", body = ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Art"
)]
pub async fn get_preview_art(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    serve_art(state, &raw_id, ArtKind::Preview).await
}

/// `/post` 与 `/post/` 不带 id
pub async fn missing_post_id() -> AppError {
    AppError::InvalidPostId("缺少 post id".to_string())
}

/// API 前缀下的未知路径
pub async fn api_not_found() -> AppError {
    AppError::NotFound("未知的 API 路径".to_string())
}

pub fn create_art_router() -> Router<AppState> {
    Router::new()
        .route("/listCache", get(list_cache))
        .route("/post", get(missing_post_id))
        .route("/post/", get(missing_post_id))
        .route("/post/:id", get(get_post_art))
        .route("/previewImage/post/:id", get(get_preview_art))
        .fallback(api_not_found)
}

async fn serve_art(state: AppState, raw_id: &str, kind: ArtKind) -> Result<Response, AppError> {
    // id 校验先于任何磁盘与网络访问
    let id: PostId = raw_id.parse()?;
    let mut guard = DisconnectGuard::new(id, kind);

    let markup = if state.cache.is_cached(id, kind.art_slot()).await {
        debug!("post {} 的 {} 字符画命中缓存", id, kind.as_str());
        state.cache.read_art(id, kind).await.map_err(AppError::from)
    } else {
        debug!("post {} 的 {} 字符画未命中，开始生成", id, kind.as_str());
        // 生成流程放进独立任务：客户端断开不会打断进行中的渲染与落盘
        match tokio::spawn(produce_art(state.clone(), id, kind)).await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal(format!("字符画生成任务失败: {e}"))),
        }
    };

    guard.disarm();
    markup.map(|markup| art_response(&markup))
}

/// ENSURE_SOURCE → RENDER → TRANSCODE → PERSIST
async fn produce_art(state: AppState, id: PostId, kind: ArtKind) -> Result<String, AppError> {
    let started = Instant::now();

    let ready = match kind {
        ArtKind::Full => state.cache.ensure_image(id).await?,
        ArtKind::Preview => state.cache.ensure_preview(id).await?,
    };
    if !ready {
        return Err(AppError::NotFound(format!(
            "post {} 的 {} 图片不可用",
            id,
            kind.as_str()
        )));
    }

    let paths = state.cache.resolve_paths(id).await;
    let source = paths
        .get(kind.source_slot())
        .map(|p| p.to_path_buf())
        .ok_or_else(|| AppError::NotFound(format!("post {} 缺少图片路径", id)))?;

    let markup = render_with_permit(&state, source).await.inspect_err(|e| {
        warn!("post {} 的 {} 字符画渲染失败: {}", id, kind.as_str(), e);
    })?;

    let path = state.cache.store_art(id, kind, &markup).await?;
    info!(
        "post {} 的 {} 字符画已生成: {:?} ({} ms)",
        id,
        kind.as_str(),
        path,
        started.elapsed().as_millis()
    );
    Ok(markup)
}

/// 在并发许可下于 blocking 线程池中调用外部渲染器并转换输出
async fn render_with_permit(state: &AppState, source: PathBuf) -> Result<String, AppError> {
    let _permit = state
        .render_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("获取渲染信号量失败: {e}")))?;

    let renderer = state.renderer.clone();
    tokio::task::spawn_blocking(move || {
        renderer
            .render(&source)
            .map(|ansi| transcoder::to_markup(&ansi))
    })
    .await
    .map_err(|e| AppError::Internal(format!("渲染任务失败: {e}")))?
    .map_err(AppError::from)
}

fn art_response(markup: &str) -> Response {
    let mut body =
        String::with_capacity(ART_WRAPPER_OPEN.len() + markup.len() + ART_WRAPPER_CLOSE.len());
    body.push_str(ART_WRAPPER_OPEN);
    body.push_str(markup);
    body.push_str(ART_WRAPPER_CLOSE);

    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, ART_CACHE_CONTROL),
        ],
        body,
    )
        .into_response()
}

/// 请求 future 在产出响应前被丢弃（客户端断开）时记录一条日志
struct DisconnectGuard {
    id: PostId,
    kind: ArtKind,
    started: Instant,
    armed: bool,
}

impl DisconnectGuard {
    fn new(id: PostId, kind: ArtKind) -> Self {
        Self {
            id,
            kind,
            started: Instant::now(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                "客户端在 post {} 的 {} 字符画就绪前断开 ({} ms)",
                self.id,
                self.kind.as_str(),
                self.started.elapsed().as_millis()
            );
        }
    }
}
