use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::models::{BrokerNode, NodeEvent, Worker, WorkerStatus};
use crate::SchedulerResult;

/// Worker注册中心
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// 状态为 RUNNING 的Worker快照
    async fn available_workers(&self) -> SchedulerResult<Vec<Worker>>;

    /// 全部已登记的Worker，不区分状态
    async fn all_workers(&self) -> SchedulerResult<Vec<Worker>>;

    async fn get(&self, worker_id: &str) -> SchedulerResult<Option<Worker>>;

    async fn register(&self, worker: Worker) -> SchedulerResult<()>;

    async fn unregister(&self, worker_id: &str) -> SchedulerResult<bool>;

    /// 仅当当前状态为 `from` 时改为 `to`
    async fn update_status(
        &self,
        worker_id: &str,
        from: WorkerStatus,
        to: WorkerStatus,
    ) -> SchedulerResult<bool>;
}

/// Worker下发统计，供LRU策略使用
#[async_trait]
pub trait WorkerStatisticsRepository: Send + Sync {
    async fn record_dispatch(&self, worker_id: &str, dispatch_at: DateTime<Utc>)
        -> SchedulerResult<()>;

    /// 指定Worker在 `since` 之后最近一次被下发的时间，未下发的不出现在结果中
    async fn latest_dispatch_since(
        &self,
        worker_ids: &[String],
        since: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<String, DateTime<Utc>>>;
}

/// 调度节点注册中心
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn register(&self, node: BrokerNode) -> SchedulerResult<()>;

    async fn unregister(&self, node_id: &str) -> SchedulerResult<()>;

    async fn alive_nodes(&self) -> SchedulerResult<Vec<BrokerNode>>;

    /// 订阅节点上下线事件
    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;
}
