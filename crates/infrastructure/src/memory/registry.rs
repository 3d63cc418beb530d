use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use scheduler_core::{
    BrokerNode, NodeEvent, NodeRegistry, SchedulerResult, Worker, WorkerMetric, WorkerRegistry,
    WorkerStatisticsRepository, WorkerStatus,
};

/// 内存Worker注册中心
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkerRegistry {
    workers: Arc<RwLock<HashMap<String, Worker>>>,
}

impl InMemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(workers: Vec<Worker>) -> Self {
        let map = workers
            .into_iter()
            .map(|w| (w.worker_id.clone(), w))
            .collect();
        Self {
            workers: Arc::new(RwLock::new(map)),
        }
    }

    /// 更新心跳上报的资源指标，熔断中的Worker恢复为 RUNNING
    pub async fn heartbeat(&self, worker_id: &str, metric: WorkerMetric) -> bool {
        match self.workers.write().await.get_mut(worker_id) {
            Some(worker) => {
                worker.metric = metric;
                if worker.status == WorkerStatus::Fusing {
                    info!("Worker {} 恢复心跳", worker_id);
                    worker.status = WorkerStatus::Running;
                }
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryWorkerRegistry {
    async fn available_workers(&self) -> SchedulerResult<Vec<Worker>> {
        let mut workers: Vec<Worker> = self
            .workers
            .read()
            .await
            .values()
            .filter(|w| w.is_alive())
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workers)
    }

    async fn all_workers(&self) -> SchedulerResult<Vec<Worker>> {
        let mut workers: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workers)
    }

    async fn get(&self, worker_id: &str) -> SchedulerResult<Option<Worker>> {
        Ok(self.workers.read().await.get(worker_id).cloned())
    }

    async fn register(&self, worker: Worker) -> SchedulerResult<()> {
        info!("Worker注册: {} ({})", worker.worker_id, worker.url());
        self.workers
            .write()
            .await
            .insert(worker.worker_id.clone(), worker);
        Ok(())
    }

    async fn unregister(&self, worker_id: &str) -> SchedulerResult<bool> {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            info!("Worker注销: {}", worker_id);
        }
        Ok(removed)
    }

    async fn update_status(
        &self,
        worker_id: &str,
        from: WorkerStatus,
        to: WorkerStatus,
    ) -> SchedulerResult<bool> {
        match self.workers.write().await.get_mut(worker_id) {
            Some(worker) if worker.status == from => {
                debug!("Worker {} 状态 {:?} → {:?}", worker_id, from, to);
                worker.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// 内存Worker下发统计
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkerStatistics {
    latest_dispatch: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryWorkerStatistics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerStatisticsRepository for InMemoryWorkerStatistics {
    async fn record_dispatch(
        &self,
        worker_id: &str,
        dispatch_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut latest = self.latest_dispatch.write().await;
        let entry = latest.entry(worker_id.to_string()).or_insert(dispatch_at);
        if *entry < dispatch_at {
            *entry = dispatch_at;
        }
        Ok(())
    }

    async fn latest_dispatch_since(
        &self,
        worker_ids: &[String],
        since: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<String, DateTime<Utc>>> {
        let latest = self.latest_dispatch.read().await;
        Ok(worker_ids
            .iter()
            .filter_map(|id| {
                latest
                    .get(id)
                    .filter(|at| **at >= since)
                    .map(|at| (id.clone(), *at))
            })
            .collect())
    }
}

/// 内存节点注册中心，上下线通过广播通知订阅者
#[derive(Debug, Clone)]
pub struct InMemoryNodeRegistry {
    nodes: Arc<RwLock<HashMap<String, BrokerNode>>>,
    events: broadcast::Sender<NodeEvent>,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }
}

impl Default for InMemoryNodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn register(&self, node: BrokerNode) -> SchedulerResult<()> {
        let previous = self
            .nodes
            .write()
            .await
            .insert(node.node_id.clone(), node.clone());
        if previous.is_none() {
            info!("调度节点上线: {} ({})", node.node_id, node.address());
            // 没有订阅者时发送失败可以忽略
            let _ = self.events.send(NodeEvent::Online(node));
        }
        Ok(())
    }

    async fn unregister(&self, node_id: &str) -> SchedulerResult<()> {
        if let Some(node) = self.nodes.write().await.remove(node_id) {
            info!("调度节点下线: {} ({})", node.node_id, node.address());
            let _ = self.events.send(NodeEvent::Offline(node));
        } else {
            debug!("注销未知节点: {}", node_id);
        }
        Ok(())
    }

    async fn alive_nodes(&self) -> SchedulerResult<Vec<BrokerNode>> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}
