use async_trait::async_trait;

use crate::models::{Task, Worker};
use crate::SchedulerResult;

/// 调度端到Worker的调用
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    /// 单次下发，返回Worker是否接收；传输失败返回 `Dispatch` 错误
    async fn send_task(&self, worker: &Worker, task: &Task) -> SchedulerResult<bool>;
}
