use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 外部资源（post）的唯一标识：正整数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PostId(u64);

/// post id 解析失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("post id 必须为正整数，收到 {0:?}")]
pub struct InvalidPostId(pub String);

impl PostId {
    /// 0 不是合法 id
    pub fn new(value: u64) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl FromStr for PostId {
    type Err = InvalidPostId;

    /// 仅接受十进制 ASCII 数字（不接受符号、空白与前导 `+`）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidPostId(s.to_string()));
        }
        s.parse::<u64>()
            .ok()
            .and_then(PostId::new)
            .ok_or_else(|| InvalidPostId(s.to_string()))
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 每个 post 缓存的五类产物
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Metadata,
    Image,
    Preview,
    Art,
    PreviewArt,
}

impl Slot {
    pub const ALL: [Slot; 5] = [
        Slot::Metadata,
        Slot::Image,
        Slot::Preview,
        Slot::Art,
        Slot::PreviewArt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Metadata => "metadata",
            Slot::Image => "image",
            Slot::Preview => "preview",
            Slot::Art => "art",
            Slot::PreviewArt => "preview_art",
        }
    }
}

/// 字符画尺寸：原图 or 预览图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtKind {
    Full,
    Preview,
}

impl ArtKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtKind::Full => "full",
            ArtKind::Preview => "preview",
        }
    }

    /// 渲染结果所在的槽位
    pub fn art_slot(self) -> Slot {
        match self {
            ArtKind::Full => Slot::Art,
            ArtKind::Preview => Slot::PreviewArt,
        }
    }

    /// 渲染输入图片所在的槽位
    pub fn source_slot(self) -> Slot {
        match self {
            ArtKind::Full => Slot::Image,
            ArtKind::Preview => Slot::Preview,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    post: Option<PostView>,
}

#[derive(Debug, Default, Deserialize)]
struct PostView {
    #[serde(default)]
    file: FileView,
    #[serde(default)]
    preview: PreviewView,
}

#[derive(Debug, Default, Deserialize)]
struct FileView {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PreviewView {
    #[serde(default)]
    url: Option<String>,
}

/// 上游返回的 post 元数据：保留原始 JSON，并抽取路径推导所需字段
#[derive(Debug, Clone)]
pub struct PostMetadata {
    raw: serde_json::Value,
    has_post: bool,
    file_url: Option<String>,
    file_ext: Option<String>,
    preview_url: Option<String>,
}

impl PostMetadata {
    pub fn from_value(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_value(raw.clone())?;
        let has_post = envelope.post.is_some();
        let post = envelope.post.unwrap_or_default();
        Ok(Self {
            raw,
            has_post,
            file_url: non_empty(post.file.url),
            file_ext: post.file.ext.filter(|ext| is_safe_extension(ext)),
            preview_url: non_empty(post.preview.url),
        })
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn has_post(&self) -> bool {
        self.has_post
    }

    pub fn file_url(&self) -> Option<&str> {
        self.file_url.as_deref()
    }

    /// 原图扩展名；预览图沿用同一扩展名
    pub fn file_ext(&self) -> Option<&str> {
        self.file_ext.as_deref()
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.preview_url.as_deref()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// 扩展名会拼进文件路径，只接受 ASCII 字母数字
fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 16 && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// 某个 post 所有槽位的解析结果；image/preview 依赖元数据中的扩展名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub metadata: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub preview: Option<PathBuf>,
    pub art: PathBuf,
    pub preview_art: PathBuf,
}

impl ResolvedPaths {
    pub fn get(&self, slot: Slot) -> Option<&Path> {
        match slot {
            Slot::Metadata => self.metadata.as_deref(),
            Slot::Image => self.image.as_deref(),
            Slot::Preview => self.preview.as_deref(),
            Slot::Art => Some(self.art.as_path()),
            Slot::PreviewArt => Some(self.preview_art.as_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PostId, PostMetadata};
    use serde_json::json;

    #[test]
    fn post_id_accepts_positive_decimal_only() {
        assert_eq!("42".parse::<PostId>().map(PostId::get), Ok(42));
        for bad in ["", "0", "000", "-5", "+5", " 7", "7 ", "abc", "1.5", "99999999999999999999999"] {
            assert!(bad.parse::<PostId>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn metadata_extracts_urls_and_extension() {
        let meta = PostMetadata::from_value(json!({
            "post": {
                "file": {"url": "https://static.example/a.png", "ext": "png"},
                "preview": {"url": "https://static.example/preview/a.jpg"}
            }
        }))
        .expect("parse metadata");
        assert!(meta.has_post());
        assert_eq!(meta.file_url(), Some("https://static.example/a.png"));
        assert_eq!(meta.file_ext(), Some("png"));
        assert_eq!(meta.preview_url(), Some("https://static.example/preview/a.jpg"));
    }

    #[test]
    fn metadata_tolerates_null_urls_and_rejects_unsafe_extension() {
        let meta = PostMetadata::from_value(json!({
            "post": {"file": {"url": null, "ext": "../x"}, "preview": {"url": ""}}
        }))
        .expect("parse metadata");
        assert_eq!(meta.file_url(), None);
        assert_eq!(meta.file_ext(), None);
        assert_eq!(meta.preview_url(), None);

        let missing = PostMetadata::from_value(json!({"success": false})).expect("parse");
        assert!(!missing.has_post());
    }
}
