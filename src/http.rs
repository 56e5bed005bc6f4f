use reqwest::Client;
use std::time::Duration;

/// 按 timeout 维度构建出站 HTTP Client。
///
/// 说明：
/// - 元数据请求与图片下载使用不同的超时，因此拆分为两个 client，各自复用连接池。
/// - `Client` 本身是线程安全的，由调度器 worker 独占持有即可。
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
}
