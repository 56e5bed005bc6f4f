use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例（仅供进程入口使用，库代码一律显式传参）
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6767,
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: "/api".to_string(),
        }
    }
}

/// 磁盘缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 缓存根目录（每个 post 一个子目录）
    pub root: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: "./database/posts".to_string(),
        }
    }
}

/// 上游 API / CDN 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// 元数据接口基地址，实际请求为 `{base_url}/posts/{id}.json`
    #[serde(default = "UpstreamConfig::default_base_url")]
    pub base_url: String,
    /// 所有出站请求携带的 User-Agent
    #[serde(default = "UpstreamConfig::default_user_agent")]
    pub user_agent: String,
    /// 两次出站请求之间的最小间隔（毫秒）
    #[serde(default = "UpstreamConfig::default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// 元数据请求超时（毫秒）
    #[serde(default = "UpstreamConfig::default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    /// 图片下载超时（毫秒）
    #[serde(default = "UpstreamConfig::default_download_timeout_ms")]
    pub download_timeout_ms: u64,
}

impl UpstreamConfig {
    fn default_base_url() -> String {
        "https://e621.net".to_string()
    }
    fn default_user_agent() -> String {
        "e26D-client/1.0.0".to_string()
    }
    fn default_rate_limit_ms() -> u64 {
        500
    }
    fn default_metadata_timeout_ms() -> u64 {
        10_000
    }
    fn default_download_timeout_ms() -> u64 {
        60_000
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            user_agent: Self::default_user_agent(),
            rate_limit_ms: Self::default_rate_limit_ms(),
            metadata_timeout_ms: Self::default_metadata_timeout_ms(),
            download_timeout_ms: Self::default_download_timeout_ms(),
        }
    }
}

/// 外部字符画渲染器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// 渲染器可执行文件路径
    #[serde(default = "RendererConfig::default_executable")]
    pub executable: String,
    /// 追加在图片路径之后的固定参数
    #[serde(default = "RendererConfig::default_args")]
    pub args: Vec<String>,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default = "RendererConfig::default_max_parallel")]
    pub max_parallel: u32,
}

impl RendererConfig {
    fn default_executable() -> String {
        "./asciiArt".to_string()
    }
    fn default_args() -> Vec<String> {
        ["-W", "200", "-C", "-c"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
    fn default_max_parallel() -> u32 {
        4
    }

    /// 实际生效的并发许可数
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get()
        } else {
            self.max_parallel as usize
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            executable: Self::default_executable(),
            args: Self::default_args(),
            max_parallel: Self::default_max_parallel(),
        }
    }
}

/// 静态前端目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub dir: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            dir: "./web".to_string(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// 上游请求与限速
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 以内置默认值为底，叠加 `config.toml`（可缺省）与环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            .add_source(ConfigBuilder::try_from(&AppConfig::default())?)
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP_SERVER__PORT=8080
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 获取缓存根目录
    pub fn cache_root(&self) -> PathBuf {
        PathBuf::from(&self.cache.root)
    }

    /// 获取静态前端目录
    pub fn web_dir(&self) -> PathBuf {
        PathBuf::from(&self.web.dir)
    }
}
