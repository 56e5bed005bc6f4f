mod common;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::{FakeUpstream, StubRenderer, cleanup, scratch_dir};
use e26d::build_router;
use e26d::config::UpstreamConfig;
use e26d::features::art::ArtRenderer;
use e26d::features::cache::AssetCache;
use e26d::features::dispatch::Dispatcher;
use e26d::state::AppState;
use flate2::read::GzDecoder;
use tower::ServiceExt;

const ANSI_ART: &str = "\x1b[38;2;10;20;30mX\x1b[0m\n\x1b[48;2;1;2;3m \x1b[0m";

struct Harness {
    upstream: FakeUpstream,
    dispatcher: Arc<Dispatcher>,
    renderer: Arc<StubRenderer>,
    root: PathBuf,
    web: PathBuf,
    app: Router,
}

impl Harness {
    async fn new(tag: &str, renderer: Arc<StubRenderer>) -> Self {
        Self::with_upstream(tag, renderer, |config| config).await
    }

    async fn with_upstream(
        tag: &str,
        renderer: Arc<StubRenderer>,
        configure: impl FnOnce(UpstreamConfig) -> UpstreamConfig,
    ) -> Self {
        let upstream = FakeUpstream::spawn().await;
        let config = configure(upstream.config(0));
        let dispatcher = Arc::new(Dispatcher::start(&config).expect("start dispatcher"));
        let root = scratch_dir(tag);
        let web = scratch_dir(&format!("{tag}_web"));
        std::fs::create_dir_all(&web).unwrap();
        std::fs::write(web.join("index.html"), "<!doctype html><title>e26D</title>").unwrap();

        let cache = Arc::new(AssetCache::new(&root, dispatcher.clone()));
        let dyn_renderer: Arc<dyn ArtRenderer> = renderer.clone();
        let state = AppState::new(cache, dyn_renderer, 2);
        let app = build_router(state, "/api", &web);

        Self {
            upstream,
            dispatcher,
            renderer,
            root,
            web,
            app,
        }
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .expect("oneshot")
    }

    async fn finish(self) {
        self.dispatcher.shutdown().await;
        cleanup(&self.root);
        cleanup(&self.web);
    }
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

async fn problem_code(resp: axum::response::Response) -> String {
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let body = body_string(resp).await;
    let v: serde_json::Value = serde_json::from_str(&body).expect("problem json");
    v["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn invalid_ids_are_rejected_before_any_io() {
    let h = Harness::new("gw_invalid", StubRenderer::ok(ANSI_ART)).await;

    for uri in [
        "/api/post/0",
        "/api/post/-5",
        "/api/post/abc",
        "/api/post/1.5",
        "/api/post/007x",
        "/api/previewImage/post/0",
        "/api/previewImage/post/abc",
        "/api/post",
        "/api/post/",
    ] {
        let resp = h.get(uri).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(problem_code(resp).await, "INVALID_POST_ID", "{uri}");
    }

    assert_eq!(h.upstream.metadata_hits(), 0);
    assert_eq!(h.upstream.download_hits(), 0);
    assert_eq!(h.renderer.calls(), 0);
    assert!(!h.root.exists());
    h.finish().await;
}

#[tokio::test]
async fn art_is_rendered_once_then_served_from_cache() {
    let h = Harness::new("gw_hit", StubRenderer::ok(ANSI_ART)).await;
    h.upstream.add_post(7, "png");

    for _ in 0..2 {
        let resp = h.get("/api/post/7").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "max-age=86400"
        );
        let body = body_string(resp).await;
        assert!(body.starts_with("<div style=\"white-space:pre;overflow-x:auto;\">"));
        assert!(body.ends_with("</div>"));
        assert!(body.contains("<span style=\"color:rgb(10,20,30)\">X</span>"));
        assert!(body.contains("<span style=\"background:rgb(1,2,3)\"> </span>"));
        assert!(!body.contains('\u{1b}'));
    }

    assert_eq!(h.renderer.calls(), 1);
    assert_eq!(h.upstream.download_hits(), 1);
    assert!(h.root.join("7").join("7.ansi_markup").is_file());
    let seen = h.renderer.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![h.root.join("7").join("7.png")]);
    h.finish().await;
}

#[tokio::test]
async fn preview_art_renders_the_preview_image() {
    let h = Harness::new("gw_preview", StubRenderer::ok(ANSI_ART)).await;
    h.upstream.add_post(15, "jpg");

    let resp = h.get("/api/previewImage/post/15").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = h.renderer.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![h.root.join("15").join("15_preview.jpg")]);
    assert!(h.root.join("15").join("15_preview.ansi_markup").is_file());
    assert!(!h.root.join("15").join("15.ansi_markup").exists());
    h.finish().await;
}

#[tokio::test]
async fn unknown_post_is_not_found() {
    let h = Harness::new("gw_404", StubRenderer::ok(ANSI_ART)).await;

    let resp = h.get("/api/post/999").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(problem_code(resp).await, "NOT_FOUND");
    assert_eq!(h.renderer.calls(), 0);
    h.finish().await;
}

#[tokio::test]
async fn missing_file_url_is_not_found_for_full_art_only() {
    let h = Harness::new("gw_no_url", StubRenderer::ok(ANSI_ART)).await;
    h.upstream.add_post_without_file_url(31, "png");

    let resp = h.get("/api/post/31").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h.get("/api/previewImage/post/31").await;
    assert_eq!(resp.status(), StatusCode::OK);
    h.finish().await;
}

#[tokio::test]
async fn render_failure_is_a_server_error_and_not_persisted() {
    let h = Harness::new("gw_render_fail", StubRenderer::failing()).await;
    h.upstream.add_post(4, "png");

    let resp = h.get("/api/post/4").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(problem_code(resp).await, "RENDER_FAILED");
    assert!(!h.root.join("4").join("4.ansi_markup").exists());

    // 不缓存失败：下一次请求会再次尝试渲染
    let resp = h.get("/api/post/4").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.renderer.calls(), 2);
    assert_eq!(h.upstream.download_hits(), 1);
    h.finish().await;
}

#[tokio::test]
async fn list_cache_returns_json_ids() {
    let h = Harness::new("gw_list", StubRenderer::ok(ANSI_ART)).await;
    h.upstream.add_post(101, "png");

    let resp = h.get("/api/listCache").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "[]");

    assert_eq!(h.get("/api/post/101").await.status(), StatusCode::OK);

    let resp = h.get("/api/listCache").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert_eq!(body_string(resp).await, "[101]");
    h.finish().await;
}

#[tokio::test]
async fn art_is_gzip_encoded_when_client_accepts_it() {
    let h = Harness::new("gw_gzip", StubRenderer::ok(ANSI_ART)).await;
    h.upstream.add_post(55, "png");

    let resp = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/post/55")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");

    let compressed = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let mut html = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut html)
        .expect("gunzip");
    assert!(html.contains("<span style=\"color:rgb(10,20,30)\">X</span>"));

    // 浏览器同时声明 br 时仍只使用 gzip
    let resp = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/post/55")
                .header(header::ACCEPT_ENCODING, "gzip, deflate, br, zstd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("oneshot");
    assert_eq!(resp.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");

    // 不声明 gzip 时返回明文
    let resp = h.get("/api/post/55").await;
    assert!(resp.headers().get(header::CONTENT_ENCODING).is_none());
    h.finish().await;
}

#[tokio::test]
async fn unknown_api_path_is_problem_not_found() {
    let h = Harness::new("gw_unknown", StubRenderer::ok(ANSI_ART)).await;

    for uri in ["/api/nope", "/api/previewImage/post", "/api/post/1/extra"] {
        let resp = h.get(uri).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(problem_code(resp).await, "NOT_FOUND", "{uri}");
    }
    assert_eq!(h.upstream.metadata_hits(), 0);
    h.finish().await;
}

#[tokio::test]
async fn health_and_static_index_are_served() {
    let h = Harness::new("gw_static", StubRenderer::ok(ANSI_ART)).await;

    let resp = h.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["status"], "healthy");
    assert_eq!(v["service"], "e26d");
    assert_eq!(v["upstream_available"], true);
    assert_eq!(v["cache_root"], h.root.display().to_string());

    let resp = h.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_string(resp).await.contains("<title>e26D</title>"));
    h.finish().await;
}

#[tokio::test]
async fn simultaneous_first_misses_both_succeed() {
    let h = Harness::new("gw_race", StubRenderer::ok(ANSI_ART)).await;
    h.upstream.add_post(61, "png");

    let (a, b) = tokio::join!(h.get("/api/post/61"), h.get("/api/post/61"));
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(body_string(a).await, body_string(b).await);

    assert!(h.root.join("61").join("61.ansi_markup").is_file());
    assert!(common::partial_files(&h.root.join("61")).is_empty());
    h.finish().await;
}

#[tokio::test]
async fn upstream_timeout_is_not_found() {
    let h = Harness::with_upstream("gw_timeout", StubRenderer::ok(ANSI_ART), |config| {
        UpstreamConfig {
            metadata_timeout_ms: 150,
            ..config
        }
    })
    .await;
    h.upstream.add_post(71, "png");
    h.upstream.slow_down_metadata(std::time::Duration::from_millis(1_000));

    let resp = h.get("/api/post/71").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(problem_code(resp).await, "NOT_FOUND");
    assert_eq!(h.renderer.calls(), 0);
    assert!(!h.root.join("71").join("71.json").exists());
    h.finish().await;
}

#[tokio::test]
async fn health_degrades_after_dispatcher_stops() {
    let h = Harness::new("gw_health_down", StubRenderer::ok(ANSI_ART)).await;
    h.dispatcher.shutdown().await;

    let resp = h.get("/health").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["status"], "degraded");
    assert_eq!(v["upstream_available"], false);
    h.finish().await;
}
