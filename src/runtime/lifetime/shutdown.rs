use tokio::signal;
use tracing::{info, warn};

/// 等待 Ctrl+C
///
/// 会话在每个请求结束时已写入存储，关闭时没有需要刷新的数据。
pub async fn listen_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping collector...");
        }
        Err(e) => {
            warn!(
                "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
                e
            );
        }
    }
}
