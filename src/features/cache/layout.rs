use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use super::models::{ArtKind, PostId};

/// 渲染结果的固定扩展名（与元数据无关）
pub const ART_EXTENSION: &str = "ansi_markup";

/// 缓存目录布局：`<root>/<id>/{<id>.json, <id>.<ext>, <id>_preview.<ext>, <id>.ansi_markup, <id>_preview.ansi_markup}`
///
/// 这里只做路径推导与阻塞式目录扫描，不涉及网络。
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn post_dir(&self, id: PostId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn metadata_path(&self, id: PostId) -> PathBuf {
        self.post_dir(id).join(format!("{id}.json"))
    }

    pub fn image_path(&self, id: PostId, ext: &str) -> PathBuf {
        self.post_dir(id).join(format!("{id}.{ext}"))
    }

    pub fn preview_path(&self, id: PostId, ext: &str) -> PathBuf {
        self.post_dir(id).join(format!("{id}_preview.{ext}"))
    }

    pub fn art_path(&self, id: PostId, kind: ArtKind) -> PathBuf {
        match kind {
            ArtKind::Full => self.post_dir(id).join(format!("{id}.{ART_EXTENSION}")),
            ArtKind::Preview => self
                .post_dir(id)
                .join(format!("{id}_preview.{ART_EXTENSION}")),
        }
    }

    /// 列出根目录下名称为规范数字、且含元数据文件的子目录。
    ///
    /// 顺序即目录遍历顺序；不可读的条目直接跳过。
    pub fn list_cached_ids(&self) -> Vec<PostId> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let id: PostId = name.parse().ok()?;
                // "007" 之类的非规范名称不对应任何 id 的目录
                (id.to_string() == name).then_some(id)
            })
            .filter(|id| self.metadata_path(*id).is_file())
            .collect()
    }

    /// 递归统计普通文件总字节数（不跟随符号链接，跳过不可读条目）
    pub fn cache_size_bytes(&self) -> u64 {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// 自底向上删除空目录（不删除根目录本身），返回删除数量
    pub fn prune_empty_dirs(&self) -> usize {
        let mut removed = 0usize;
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            let is_empty = fs::read_dir(path)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                continue;
            }
            match fs::remove_dir(path) {
                Ok(()) => {
                    tracing::info!("已删除空缓存目录: {:?}", path);
                    removed += 1;
                }
                Err(e) => tracing::warn!("删除空目录 {:?} 失败: {}", path, e),
            }
        }
        removed
    }
}

/// 临时文件后缀
const PARTIAL_SUFFIX: &str = "part";

/// 写入中的临时文件路径：`<path>.<uuid>.part`
///
/// 每个写入者各用一个临时文件，并发写同一目标时只在最后的 rename 上竞争。
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}.{PARTIAL_SUFFIX}", Uuid::new_v4().simple()));
    PathBuf::from(name)
}

/// 是否为写入中的临时文件
pub fn is_partial(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

/// 先写临时文件再 rename，保证读者只会看到完整文件；并发写入时最后完成者胜出
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = partial_path(path);
    let written = match tokio::fs::write(&part, bytes).await {
        Ok(()) => tokio::fs::rename(&part, path).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    written
}
