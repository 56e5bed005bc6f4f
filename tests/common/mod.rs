#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use e26d::config::UpstreamConfig;
use e26d::features::art::{ArtRenderer, RenderError};
use e26d::features::cache::is_partial;
use serde_json::{Value, json};
use uuid::Uuid;

/// 本地假上游：`/posts/{id}.json` 与 `/files/{name}`
pub struct FakeUpstream {
    pub base_url: String,
    pub state: Arc<UpstreamState>,
}

#[derive(Default)]
pub struct UpstreamState {
    pub posts: Mutex<HashMap<u64, Value>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub metadata_hits: AtomicUsize,
    pub download_hits: AtomicUsize,
    pub call_starts: Mutex<Vec<Instant>>,
    pub user_agents: Mutex<Vec<String>>,
    /// 元数据接口的人为延迟（毫秒）
    pub metadata_delay_ms: AtomicU64,
}

impl UpstreamState {
    fn record(&self, headers: &HeaderMap) {
        self.call_starts.lock().unwrap().push(Instant::now());
        let ua = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.user_agents.lock().unwrap().push(ua);
    }
}

async fn metadata(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    UrlPath(file): UrlPath<String>,
) -> Response {
    state.record(&headers);
    state.metadata_hits.fetch_add(1, Ordering::SeqCst);
    let delay = state.metadata_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let post = file
        .strip_suffix(".json")
        .and_then(|id| id.parse::<u64>().ok())
        .and_then(|id| state.posts.lock().unwrap().get(&id).cloned());
    match post {
        Some(body) => Json(body).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "reason": "not found"})),
        )
            .into_response(),
    }
}

async fn file(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    UrlPath(name): UrlPath<String>,
) -> Response {
    state.record(&headers);
    state.download_hits.fetch_add(1, Ordering::SeqCst);
    match state.files.lock().unwrap().get(&name).cloned() {
        Some(bytes) => bytes.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

impl FakeUpstream {
    pub async fn spawn() -> Self {
        let state = Arc::new(UpstreamState::default());
        let app = Router::new()
            .route("/posts/:file", get(metadata))
            .route("/files/:name", get(file))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        let addr = listener.local_addr().expect("fake upstream addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// 注册一个带原图与预览图的 post
    pub fn add_post(&self, id: u64, ext: &str) {
        let full = format!("{id}.{ext}");
        let preview = format!("{id}_preview.{ext}");
        self.insert_post(
            id,
            json!({
                "post": {
                    "id": id,
                    "file": {"url": format!("{}/files/{full}", self.base_url), "ext": ext},
                    "preview": {"url": format!("{}/files/{preview}", self.base_url)}
                }
            }),
        );
        let mut files = self.state.files.lock().unwrap();
        files.insert(full, format!("full-image-{id}").into_bytes());
        files.insert(preview, format!("preview-image-{id}").into_bytes());
    }

    /// 注册一个原图地址为空（例如被上游隐藏）的 post
    pub fn add_post_without_file_url(&self, id: u64, ext: &str) {
        let preview = format!("{id}_preview.{ext}");
        self.insert_post(
            id,
            json!({
                "post": {
                    "id": id,
                    "file": {"url": null, "ext": ext},
                    "preview": {"url": format!("{}/files/{preview}", self.base_url)}
                }
            }),
        );
        self.state
            .files
            .lock()
            .unwrap()
            .insert(preview, format!("preview-image-{id}").into_bytes());
    }

    pub fn insert_post(&self, id: u64, body: Value) {
        self.state.posts.lock().unwrap().insert(id, body);
    }

    pub fn insert_file(&self, name: &str, bytes: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn metadata_hits(&self) -> usize {
        self.state.metadata_hits.load(Ordering::SeqCst)
    }

    pub fn download_hits(&self) -> usize {
        self.state.download_hits.load(Ordering::SeqCst)
    }

    /// 让元数据接口在响应前等待 `delay`
    pub fn slow_down_metadata(&self, delay: Duration) {
        self.state
            .metadata_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn config(&self, rate_limit_ms: u64) -> UpstreamConfig {
        UpstreamConfig {
            base_url: self.base_url.clone(),
            rate_limit_ms,
            ..UpstreamConfig::default()
        }
    }
}

/// 目录中残留的写入临时文件
pub fn partial_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| is_partial(p))
                .collect()
        })
        .unwrap_or_default()
}

/// 系统临时目录下的唯一目录（不预先创建）
pub fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("e26d_{tag}_{}", Uuid::new_v4()))
}

pub fn cleanup(dir: &Path) {
    let _ = std::fs::remove_dir_all(dir);
}

/// 记录调用次数的假渲染器
pub struct StubRenderer {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<PathBuf>>,
    output: Option<String>,
}

impl StubRenderer {
    pub fn ok(output: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            output: Some(output.to_string()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            output: None,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtRenderer for StubRenderer {
    fn render(&self, image: &Path) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(image.to_path_buf());
        match &self.output {
            Some(out) => Ok(out.clone()),
            None => Err(RenderError::Failed {
                code: Some(1),
                stderr: "stub renderer failure".to_string(),
            }),
        }
    }
}
