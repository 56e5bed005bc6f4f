use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::features::art::ArtRenderer;
use crate::features::cache::AssetCache;

/// 聚合的应用共享状态（显式构造、显式传递，不依赖全局单例）
#[derive(Clone)]
pub struct AppState {
    /// 磁盘资产缓存（内部持有出站调度器）
    pub cache: Arc<AssetCache>,
    /// 外部字符画渲染器
    pub renderer: Arc<dyn ArtRenderer>,
    /// 控制并发渲染的信号量（限制同时运行的渲染子进程数量）
    pub render_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(cache: Arc<AssetCache>, renderer: Arc<dyn ArtRenderer>, max_parallel: usize) -> Self {
        Self {
            cache,
            renderer,
            render_semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }
}
