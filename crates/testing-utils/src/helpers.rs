//! 异步测试辅助

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// 测试环境辅助
pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时，返回条件最终是否成立
    ///
    /// 使用 tokio 时钟，暂停时间的测试中同样有效。
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10)).await
    }

    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(poll_interval).await;
        }
    }
}
