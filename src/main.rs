use std::sync::Arc;

use e26d::features::art::{ArtRenderer, ProcessRenderer};
use e26d::features::cache::AssetCache;
use e26d::features::dispatch::Dispatcher;
use e26d::shutdown::run_with_timeout;
use e26d::startup::run_startup_checks;
use e26d::state::AppState;
use e26d::{AppConfig, ShutdownManager, build_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "e26d=info,tower_http=info".into()),
        )
        .init();

    let shutdown_manager = ShutdownManager::new();

    // Load config
    if let Err(e) = AppConfig::init_global() {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    // 启动信号处理器
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // Run startup checks
    if let Err(e) = run_startup_checks(config).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let dispatcher = match Dispatcher::start(&config.upstream) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            tracing::error!("出站调度器启动失败: {}", e);
            std::process::exit(1);
        }
    };

    let cache = Arc::new(AssetCache::new(config.cache_root(), dispatcher.clone()));
    let process_renderer = ProcessRenderer::from_config(&config.renderer);
    tracing::info!(
        "字符画渲染器: {:?}，最大并发 {}",
        process_renderer.executable(),
        config.renderer.effective_parallelism()
    );
    let renderer: Arc<dyn ArtRenderer> = Arc::new(process_renderer);
    let app_state = AppState::new(cache, renderer, config.renderer.effective_parallelism());

    let app = build_router(app_state, &config.api.prefix, &config.web_dir());

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Art API: http://{}{}/post/{{id}}", addr, config.api.prefix);
    tracing::info!("Cache root: {:?}", config.cache_root());

    let shutdown_signal = {
        let manager = shutdown_manager.clone();
        async move {
            let reason = manager.wait_for_shutdown().await;
            tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
        }
    };

    let graceful = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);
    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
    }

    // HTTP 停止后再关闭调度器：尚未执行的出站操作统一以 Stopped 结束
    let timeout = config.shutdown.timeout_duration();
    match run_with_timeout("关闭出站调度器", timeout, dispatcher.shutdown()).await {
        Ok(()) => tracing::info!("出站调度器已关闭"),
        Err(e) => tracing::warn!("出站调度器关闭失败: {}", e),
    }

    tracing::info!("服务器已优雅关闭");
}
