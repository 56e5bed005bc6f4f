use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::cache::CacheLayout;

/// 执行启动检查
///
/// 1. 检查并创建缓存根目录
/// 2. 检查外部渲染器与前端目录（仅告警）
/// 3. 统计当前缓存体积
pub async fn run_startup_checks(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    ensure_cache_root(&config.cache_root())?;
    check_renderer_executable(&config.renderer.executable);
    check_web_dir(&config.web_dir());

    let layout = CacheLayout::new(config.cache_root());
    match tokio::task::spawn_blocking(move || layout.cache_size_bytes()).await {
        Ok(bytes) => tracing::info!("📦 当前缓存体积: {:.2} MB", bytes_to_mb(bytes)),
        Err(e) => tracing::warn!("统计缓存体积失败: {}", e),
    }

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

fn ensure_cache_root(root: &Path) -> Result<(), AppError> {
    if root.is_dir() {
        tracing::info!("✅ 缓存目录已存在: {:?}", root);
        return Ok(());
    }

    tracing::warn!("📁 未找到缓存目录，正在创建: {:?}", root);
    fs::create_dir_all(root)
        .map_err(|e| AppError::Internal(format!("创建缓存目录失败: {e}")))?;
    tracing::info!("✅ 缓存目录创建成功");
    Ok(())
}

/// 只检查带路径分隔符的配置；裸命令名交给 PATH 解析
fn check_renderer_executable(executable: &str) {
    let path = Path::new(executable);
    if path.components().count() <= 1 {
        tracing::info!("渲染器将通过 PATH 查找: {}", executable);
        return;
    }
    if path.is_file() {
        tracing::info!("✅ 渲染器存在: {:?}", path);
    } else {
        tracing::warn!("⚠️ 未找到渲染器 {:?}，未缓存的字符画请求将返回 500", path);
    }
}

fn check_web_dir(dir: &Path) {
    if dir.join("index.html").is_file() {
        tracing::info!("✅ 前端目录: {:?}", dir);
    } else {
        tracing::warn!("⚠️ 前端目录 {:?} 中没有 index.html", dir);
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
