use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::config::RendererConfig;

/// 外部渲染器错误：对当前请求是致命的，不重试
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("渲染器可执行文件不存在: {0:?}")]
    MissingExecutable(PathBuf),

    #[error("渲染器退出码 {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("调用渲染器失败: {0}")]
    Io(#[from] io::Error),
}

/// 图片 → ANSI 文本的渲染接口（阻塞调用，需在 blocking 线程池中执行）
pub trait ArtRenderer: Send + Sync {
    fn render(&self, image: &Path) -> Result<String, RenderError>;
}

/// 以子进程方式调用外部渲染器：`<executable> <image> <args...>`
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    executable: PathBuf,
    args: Vec<String>,
}

impl ProcessRenderer {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    pub fn from_config(config: &RendererConfig) -> Self {
        Self::new(&config.executable, config.args.clone())
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl ArtRenderer for ProcessRenderer {
    fn render(&self, image: &Path) -> Result<String, RenderError> {
        let output = Command::new(&self.executable)
            .arg(image)
            .args(&self.args)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RenderError::MissingExecutable(self.executable.clone()),
                _ => RenderError::Io(e),
            })?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
