use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 关闭信号的广播
///
/// 触发后的订阅会立即收到信号，重复触发无效。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender: Arc::new(RwLock::new(Some(sender))),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.sender.read().await.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(1);
                let _ = sender.send(());
                receiver
            }
        }
    }

    pub async fn shutdown(&self) {
        let Some(sender) = self.sender.write().await.take() else {
            debug!("关闭信号已发送过");
            return;
        };
        // 没有订阅者时发送失败可以忽略
        let _ = sender.send(());
        info!("关闭信号已发送给 {} 个订阅者", sender.receiver_count());
    }

    pub async fn is_shutdown(&self) -> bool {
        self.sender.read().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
