//! 限速出站请求调度器
//!
//! 所有对上游 API / CDN 的请求都经由唯一的 worker 串行执行，
//! 相邻两次网络调用之间至少间隔 `rate_limit`，与并发提交者数量无关。

pub mod models;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use models::{DispatchError, Operation, OperationOutput};
use models::QueuedOperation;

use crate::config::UpstreamConfig;
use crate::features::cache::{PostId, partial_path};
use crate::http::build_client;

/// 调度器句柄：对外只暴露阻塞式提交与优雅关闭
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<QueuedOperation>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// 构建 HTTP client 并在当前 tokio runtime 上启动唯一的 worker
    pub fn start(config: &UpstreamConfig) -> Result<Self, DispatchError> {
        let worker = Worker {
            metadata_client: build_client(&config.user_agent, config.metadata_timeout())?,
            download_client: build_client(&config.user_agent, config.download_timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            delay: config.rate_limit(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            "启动出站请求调度器: base_url={}, 最小间隔 {:?}",
            worker.base_url, worker.delay
        );
        let handle = tokio::spawn(worker.run(rx, shutdown_rx));

        Ok(Self {
            tx,
            shutdown_tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// 提交操作并等待其完成。
    ///
    /// 提交者只等待自己的完成信号，服务顺序即入队顺序（FIFO）。
    pub async fn submit(&self, op: Operation) -> Result<OperationOutput, DispatchError> {
        if *self.shutdown_tx.borrow() {
            return Err(DispatchError::Stopped);
        }
        let (reply, done) = oneshot::channel();
        self.tx
            .send(QueuedOperation { op, reply })
            .map_err(|_| DispatchError::Stopped)?;
        // 发送端被丢弃意味着 worker 在执行前退出
        done.await.map_err(|_| DispatchError::Stopped)?
    }

    pub async fn fetch_metadata(&self, id: PostId) -> Result<serde_json::Value, DispatchError> {
        match self.submit(Operation::FetchMetadata(id)).await? {
            OperationOutput::Metadata(value) => Ok(value),
            OperationOutput::Downloaded(path) => Err(DispatchError::InvalidResponse(format!(
                "fetch_metadata 返回了下载路径 {path:?}"
            ))),
        }
    }

    pub async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, DispatchError> {
        let op = Operation::Download {
            url: url.to_string(),
            dest: dest.to_path_buf(),
        };
        match self.submit(op).await? {
            OperationOutput::Downloaded(path) => Ok(path),
            OperationOutput::Metadata(_) => Err(DispatchError::InvalidResponse(
                "download 返回了元数据".to_string(),
            )),
        }
    }

    /// 通知 worker 退出并等待其结束。
    ///
    /// 已发出的网络请求会完成；仍在排队或限速等待中的操作一律以 `Stopped` 结束。
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            debug!("调度器 worker 已不在运行");
        }
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("调度器 worker 异常退出: {}", e);
            }
        }
    }

    /// 检查调度器是否已收到关闭信号
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow() || self.tx.is_closed()
    }
}

struct Worker {
    metadata_client: Client,
    download_client: Client,
    base_url: String,
    delay: Duration,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<QueuedOperation>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut last_call_end: Option<Instant> = None;

        loop {
            let queued = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                next = rx.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };

            if queued.reply.is_closed() {
                debug!("提交者已放弃等待，跳过 {}", queued.op.kind());
                continue;
            }

            if let Some(end) = last_call_end {
                let elapsed = end.elapsed();
                if elapsed < self.delay {
                    // 限速等待期间收到关闭信号：该操作尚未发出，按未执行处理
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            let _ = queued.reply.send(Err(DispatchError::Stopped));
                            break;
                        }
                        _ = tokio::time::sleep(self.delay - elapsed) => {}
                    }
                }
            }

            let kind = queued.op.kind();
            debug!("开始执行出站操作: {}", kind);
            let result = self.execute(queued.op).await;
            last_call_end = Some(Instant::now());

            if let Err(e) = &result {
                warn!("出站操作 {} 失败: {}", kind, e);
            }
            // 提交者可能已离开，结果无人接收时直接丢弃
            let _ = queued.reply.send(result);
        }

        rx.close();
        let mut abandoned = 0usize;
        while rx.try_recv().is_ok() {
            abandoned += 1;
        }
        info!("调度器 worker 已退出，丢弃 {} 个未执行的操作", abandoned);
    }

    async fn execute(&self, op: Operation) -> Result<OperationOutput, DispatchError> {
        match op {
            Operation::FetchMetadata(id) => self.fetch_metadata(id).await.map(OperationOutput::Metadata),
            Operation::Download { url, dest } => self
                .download(&url, &dest)
                .await
                .map(|()| OperationOutput::Downloaded(dest)),
        }
    }

    async fn fetch_metadata(&self, id: PostId) -> Result<serde_json::Value, DispatchError> {
        let url = format!("{}/posts/{}.json", self.base_url, id);
        let response = self
            .metadata_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<serde_json::Value>().await?)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), DispatchError> {
        let response = self
            .download_client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // 先写入 .part，完整落盘后再 rename，避免半截文件被当作缓存命中
        let part = partial_path(dest);
        let written = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut stream = response.bytes_stream();
            let mut total = 0usize;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                total = total.saturating_add(chunk.len());
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            tokio::fs::rename(&part, dest).await?;
            Ok::<usize, DispatchError>(total)
        }
        .await;

        match written {
            Ok(total) => {
                debug!("下载完成: {} -> {:?} ({} bytes)", url, dest, total);
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    debug!("清理临时文件 {:?} 失败: {}", part, rm);
                }
                Err(e)
            }
        }
    }
}
