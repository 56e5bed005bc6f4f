use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::features::cache::PostId;

/// 提交给调度器的出站操作
#[derive(Debug, Clone)]
pub enum Operation {
    /// 拉取 `{base_url}/posts/{id}.json`
    FetchMetadata(PostId),
    /// 流式下载 `url` 到 `dest`
    Download { url: String, dest: PathBuf },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::FetchMetadata(_) => "fetch_metadata",
            Operation::Download { .. } => "download",
        }
    }
}

/// 操作成功后的结果载荷
#[derive(Debug, Clone)]
pub enum OperationOutput {
    /// 解析后的元数据 JSON
    Metadata(serde_json::Value),
    /// 下载完成后的目标路径
    Downloaded(PathBuf),
}

/// 调度器错误：传输细节统一归一为一种失败，调用方无需区分
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// 请求超时（connect/read）
    #[error("请求超时: {0}")]
    Timeout(String),

    /// 上游返回非 2xx
    #[error("上游返回状态码 {status}: {url}")]
    Status { status: u16, url: String },

    /// 传输层错误（DNS/连接/解码等）
    #[error("请求失败: {0}")]
    Transport(String),

    /// 落盘失败
    #[error("I/O 错误: {0}")]
    Io(String),

    /// 结果类型与操作不匹配
    #[error("无效的响应: {0}")]
    InvalidResponse(String),

    /// 调度器已停止，操作未被执行
    #[error("调度器已停止")]
    Stopped,
}

impl DispatchError {
    /// 上游明确表示资源不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            DispatchError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Io(err.to_string())
    }
}

/// 队列中的一项：操作 + 一次性完成信号
#[derive(Debug)]
pub(crate) struct QueuedOperation {
    pub op: Operation,
    pub reply: oneshot::Sender<Result<OperationOutput, DispatchError>>,
}
