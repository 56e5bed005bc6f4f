//! 磁盘资产缓存
//!
//! 文件是否存在即是否命中，不维护额外索引；已写入的文件永不覆盖、永不重新校验。

mod layout;
pub mod models;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

pub use layout::{ART_EXTENSION, CacheLayout, is_partial, partial_path};
pub use models::{ArtKind, InvalidPostId, PostId, PostMetadata, ResolvedPaths, Slot};

use crate::features::dispatch::Dispatcher;
use layout::write_atomic;

/// 本地缓存读写错误（预期内的“缺失”不算错误）
#[derive(Error, Debug)]
pub enum CacheError {
    /// 读写缓存文件失败
    #[error("缓存文件 {path:?} 读写失败: {message}")]
    Io { path: PathBuf, message: String },

    /// 已缓存的元数据无法解析
    #[error("缓存元数据 {path:?} 已损坏: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl CacheError {
    fn io(path: &Path, err: impl ToString) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// 资产缓存：按 id 推导路径，缺失时经由调度器拉取并落盘
pub struct AssetCache {
    layout: CacheLayout,
    dispatcher: Arc<Dispatcher>,
    /// 体积统计 / 目录枚举的粗粒度锁
    scan_lock: Arc<Mutex<()>>,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            layout: CacheLayout::new(root),
            dispatcher,
            scan_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// 出站调度器是否仍在接收新操作
    pub fn upstream_available(&self) -> bool {
        !self.dispatcher.is_stopped()
    }

    /// 只读取本地已缓存的元数据，不触发网络
    pub async fn read_cached_metadata(
        &self,
        id: PostId,
    ) -> Result<Option<PostMetadata>, CacheError> {
        let path = self.layout.metadata_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        let corrupt = |e: serde_json::Error| CacheError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        };
        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(corrupt)?;
        PostMetadata::from_value(value).map(Some).map_err(corrupt)
    }

    /// 获取元数据：本地命中直接返回；否则经调度器拉取并先落盘再返回。
    ///
    /// 上游失败只记录日志并返回 `None`；本地文件损坏则作为错误返回。
    pub async fn get_metadata(&self, id: PostId) -> Result<Option<PostMetadata>, CacheError> {
        if let Some(meta) = self.read_cached_metadata(id).await? {
            return Ok(Some(meta));
        }

        let raw = match self.dispatcher.fetch_metadata(id).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                info!("post {} 在上游不存在", id);
                return Ok(None);
            }
            Err(e) => {
                warn!("拉取 post {} 元数据失败: {}", id, e);
                return Ok(None);
            }
        };

        let meta = match PostMetadata::from_value(raw) {
            Ok(meta) if meta.has_post() => meta,
            Ok(_) => {
                warn!("post {} 的上游响应缺少 post 字段，未写入缓存", id);
                return Ok(None);
            }
            Err(e) => {
                warn!("post {} 的上游元数据格式异常，未写入缓存: {}", id, e);
                return Ok(None);
            }
        };

        let path = self.layout.metadata_path(id);
        let pretty = serde_json::to_vec_pretty(meta.raw()).map_err(|e| CacheError::io(&path, e))?;
        write_atomic(&path, &pretty)
            .await
            .map_err(|e| CacheError::io(&path, e))?;
        debug!("post {} 元数据已缓存: {:?}", id, path);

        Ok(Some(meta))
    }

    /// 解析全部槽位路径（必要时触发元数据拉取）。
    ///
    /// 元数据不可用或已损坏时，仅两个渲染结果槽位有值。
    pub async fn resolve_paths(&self, id: PostId) -> ResolvedPaths {
        let meta = match self.get_metadata(id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("解析 post {} 路径时按未命中处理: {}", id, e);
                None
            }
        };
        let ext = meta.as_ref().and_then(|m| m.file_ext());

        ResolvedPaths {
            metadata: meta.as_ref().map(|_| self.layout.metadata_path(id)),
            image: ext.map(|ext| self.layout.image_path(id, ext)),
            preview: ext.map(|ext| self.layout.preview_path(id, ext)),
            art: self.layout.art_path(id, ArtKind::Full),
            preview_art: self.layout.art_path(id, ArtKind::Preview),
        }
    }

    /// 确保原图已下载（幂等）
    pub async fn ensure_image(&self, id: PostId) -> Result<bool, CacheError> {
        self.ensure_source(id, ArtKind::Full).await
    }

    /// 确保预览图已下载（幂等）
    pub async fn ensure_preview(&self, id: PostId) -> Result<bool, CacheError> {
        self.ensure_source(id, ArtKind::Preview).await
    }

    async fn ensure_source(&self, id: PostId, kind: ArtKind) -> Result<bool, CacheError> {
        let Some(meta) = self.get_metadata(id).await? else {
            return Ok(false);
        };
        let Some(ext) = meta.file_ext() else {
            warn!("post {} 的元数据缺少文件扩展名", id);
            return Ok(false);
        };

        let (url, dest) = match kind {
            ArtKind::Full => (meta.file_url(), self.layout.image_path(id, ext)),
            ArtKind::Preview => (meta.preview_url(), self.layout.preview_path(id, ext)),
        };

        if file_exists(&dest).await {
            return Ok(true);
        }

        let Some(url) = url else {
            warn!("post {} 没有 {} 图片地址", id, kind.as_str());
            return Ok(false);
        };

        match self.dispatcher.download(url, &dest).await {
            Ok(path) => {
                info!("post {} 的 {} 图片已下载: {:?}", id, kind.as_str(), path);
                Ok(true)
            }
            Err(e) => {
                warn!("下载 post {} 的 {} 图片失败: {}", id, kind.as_str(), e);
                Ok(false)
            }
        }
    }

    /// 某槽位文件是否已存在；image/preview 仅参考本地元数据，不触发网络
    pub async fn is_cached(&self, id: PostId, slot: Slot) -> bool {
        let path = match slot {
            Slot::Metadata => self.layout.metadata_path(id),
            Slot::Art => self.layout.art_path(id, ArtKind::Full),
            Slot::PreviewArt => self.layout.art_path(id, ArtKind::Preview),
            Slot::Image | Slot::Preview => {
                let Ok(Some(meta)) = self.read_cached_metadata(id).await else {
                    return false;
                };
                let Some(ext) = meta.file_ext() else {
                    return false;
                };
                if slot == Slot::Image {
                    self.layout.image_path(id, ext)
                } else {
                    self.layout.preview_path(id, ext)
                }
            }
        };
        file_exists(&path).await
    }

    /// 读取已持久化的渲染结果
    pub async fn read_art(&self, id: PostId, kind: ArtKind) -> Result<String, CacheError> {
        let path = self.layout.art_path(id, kind);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CacheError::io(&path, e))
    }

    /// 持久化渲染结果，下次请求直接命中
    pub async fn store_art(
        &self,
        id: PostId,
        kind: ArtKind,
        markup: &str,
    ) -> Result<PathBuf, CacheError> {
        let path = self.layout.art_path(id, kind);
        write_atomic(&path, markup.as_bytes())
            .await
            .map_err(|e| CacheError::io(&path, e))?;
        Ok(path)
    }

    pub async fn list_cached_ids(&self) -> Vec<PostId> {
        self.run_scan("枚举缓存目录", |layout| layout.list_cached_ids())
            .await
    }

    pub async fn cache_size_bytes(&self) -> u64 {
        self.run_scan("统计缓存体积", |layout| layout.cache_size_bytes())
            .await
    }

    pub async fn prune_empty_dirs(&self) -> usize {
        self.run_scan("清理空缓存目录", |layout| layout.prune_empty_dirs())
            .await
    }

    /// 目录扫描移出 tokio worker，并在粗粒度锁下串行执行
    async fn run_scan<T, F>(&self, label: &'static str, scan: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&CacheLayout) -> T + Send + 'static,
    {
        let layout = self.layout.clone();
        let lock = self.scan_lock.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            scan(&layout)
        })
        .await;

        match joined {
            Ok(value) => value,
            Err(e) => {
                warn!("{}任务失败: {}", label, e);
                T::default()
            }
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
