//! 本地缓存维护工具（不访问网络）：
//! - 统计缓存体积
//! - 列出已缓存的 post id
//! - 删除空的缓存目录

use std::env;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use e26d::AppConfig;
use e26d::features::cache::CacheLayout;
use e26d::startup::checks::bytes_to_mb;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Size,
    List,
    Prune,
}

#[derive(Debug, Clone)]
struct Args {
    help: bool,
    json: bool,
    root: Option<PathBuf>,
    cmd: Option<Command>,
}

#[derive(Debug)]
enum CliError {
    Args(String),
    Encode(String),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Args(msg) => write!(f, "参数错误: {msg}"),
            CliError::Encode(msg) => write!(f, "输出编码失败: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl Args {
    fn parse(argv: Vec<String>) -> Result<Self, CliError> {
        let mut help = false;
        let mut json = false;
        let mut root = None;
        let mut cmd = None;
        let mut idx = 0usize;

        while idx < argv.len() {
            match argv[idx].as_str() {
                "-h" | "--help" => help = true,
                "--json" => json = true,
                "--root" => {
                    idx += 1;
                    root = Some(PathBuf::from(
                        argv.get(idx)
                            .ok_or_else(|| CliError::Args("缺少 --root 的值".to_string()))?,
                    ));
                }
                other if cmd.is_none() => {
                    cmd = Some(match other {
                        "size" => Command::Size,
                        "list" => Command::List,
                        "prune" => Command::Prune,
                        _ => return Err(CliError::Args(format!("未知命令: {other}"))),
                    });
                }
                other => return Err(CliError::Args(format!("多余的参数: {other}"))),
            }
            idx += 1;
        }

        Ok(Self {
            help,
            json,
            root,
            cmd,
        })
    }
}

/// 未显式指定时沿用服务端配置中的缓存根目录
fn resolve_root(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(root) = explicit {
        return root;
    }
    match AppConfig::load() {
        Ok(cfg) => cfg.cache_root(),
        Err(e) => {
            tracing::warn!("读取配置失败，使用默认缓存目录: {}", e);
            AppConfig::default().cache_root()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse(env::args().skip(1).collect())?;
    let Some(cmd) = args.cmd.clone().filter(|_| !args.help) else {
        print_help();
        return Ok(());
    };

    let layout = CacheLayout::new(resolve_root(args.root));

    match cmd {
        Command::Size => {
            let bytes = layout.cache_size_bytes();
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({ "bytes": bytes, "mb": bytes_to_mb(bytes) })
                );
            } else {
                println!("{:?}: {} bytes ({:.2} MB)", layout.root(), bytes, bytes_to_mb(bytes));
            }
        }
        Command::List => {
            let ids = layout.list_cached_ids();
            if args.json {
                let out = serde_json::to_string(&ids).map_err(|e| CliError::Encode(e.to_string()))?;
                println!("{out}");
            } else {
                for id in &ids {
                    println!("{id}");
                }
                eprintln!("共 {} 个已缓存的 post", ids.len());
            }
        }
        Command::Prune => {
            let removed = layout.prune_empty_dirs();
            println!("已删除 {removed} 个空目录");
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"cache_admin（本地缓存维护工具）

全局参数：
  --root DIR     缓存根目录（默认读取 config.toml 的 cache.root，否则 ./database/posts）
  --json         JSON 输出（size / list）
  -h, --help     显示帮助

命令：
  size           统计缓存体积
  list           列出已缓存的 post id
  prune          删除空的缓存目录"#
    );
}
