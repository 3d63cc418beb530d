//! 任务下发
//!
//! 先按执行器、标签、资源过滤候选Worker，再交给负载均衡策略挑选，
//! 被拒绝或调用失败的Worker从候选中剔除后继续尝试，直到成功或次数用尽。

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use scheduler_core::{
    DispatcherConfig, SchedulerError, SchedulerResult, Task, Worker, WorkerRegistry, WorkerRpc,
    WorkerStatisticsRepository,
};

use crate::strategies::{SelectContext, WorkerSelectorFactory};

const DEFAULT_LRU_LOOKBACK_SECONDS: i64 = 600;

/// 一次下发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已被Worker接收
    Dispatched { worker_id: String },
    /// 尝试次数用尽仍未被接收
    Exhausted { attempts: u32 },
}

pub struct TaskDispatcher {
    workers: Arc<dyn WorkerRegistry>,
    statistics: Arc<dyn WorkerStatisticsRepository>,
    rpc: Arc<dyn WorkerRpc>,
    selectors: WorkerSelectorFactory,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    pub fn new(
        workers: Arc<dyn WorkerRegistry>,
        statistics: Arc<dyn WorkerStatisticsRepository>,
        rpc: Arc<dyn WorkerRpc>,
        selectors: WorkerSelectorFactory,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            workers,
            statistics,
            rpc,
            selectors,
            config,
        }
    }

    /// 下发任务，不修改任务状态
    ///
    /// 没有任何候选Worker时返回 `NoWorkerAvailable`。
    pub async fn dispatch(&self, task: &Task) -> SchedulerResult<DispatchOutcome> {
        if let Some(worker_id) = task.worker_id.as_deref() {
            return self.dispatch_to(task, worker_id).await;
        }

        let mut candidates = self.candidates(task).await?;
        if candidates.is_empty() {
            return Err(SchedulerError::NoWorkerAvailable(format!(
                "任务 {} 执行器 {}",
                task.task_id, task.executor_name
            )));
        }

        let started = std::time::Instant::now();
        let context = self.select_context(task, &candidates).await;
        let selector = self.selectors.get(task.dispatch_option.load_balance_type);
        let max_attempts = self.config.max_dispatch_attempts.max(1);

        for attempt in 1..=max_attempts {
            if candidates.is_empty() {
                debug!("任务 {} 候选Worker已耗尽", task.task_id);
                break;
            }
            let Some(worker) = selector.select(&context, &candidates) else {
                debug!(
                    "任务 {} 第 {} 次选择未命中 ({})",
                    task.task_id,
                    attempt,
                    selector.name()
                );
                continue;
            };

            if self.send(&worker, task).await {
                histogram!("scheduler_task_dispatch_duration_ms")
                    .record(started.elapsed().as_millis() as f64);
                return Ok(DispatchOutcome::Dispatched {
                    worker_id: worker.worker_id,
                });
            }
            candidates.retain(|w| w.worker_id != worker.worker_id);
        }

        warn!("任务 {} 下发失败，已尝试 {} 次", task.task_id, max_attempts);
        counter!("scheduler_task_dispatch_exhausted_total").increment(1);
        Ok(DispatchOutcome::Exhausted {
            attempts: max_attempts,
        })
    }

    /// 预先指定了Worker的任务只尝试一次
    async fn dispatch_to(&self, task: &Task, worker_id: &str) -> SchedulerResult<DispatchOutcome> {
        let worker = match self.workers.get(worker_id).await? {
            Some(worker) if worker.is_alive() => worker,
            _ => {
                warn!("任务 {} 指定的Worker {} 不可用", task.task_id, worker_id);
                return Ok(DispatchOutcome::Exhausted { attempts: 1 });
            }
        };
        if self.send(&worker, task).await {
            Ok(DispatchOutcome::Dispatched {
                worker_id: worker.worker_id,
            })
        } else {
            Ok(DispatchOutcome::Exhausted { attempts: 1 })
        }
    }

    async fn candidates(&self, task: &Task) -> SchedulerResult<Vec<Worker>> {
        let workers = self.workers.available_workers().await?;
        Ok(workers
            .into_iter()
            .filter(|w| {
                w.is_alive()
                    && w.has_executor(&task.executor_name)
                    && w.matches_tags(task.tag_filters())
                    && w.has_available_resource()
            })
            .collect())
    }

    async fn select_context(&self, task: &Task, candidates: &[Worker]) -> SelectContext {
        let mut context = SelectContext::new(&task.job_instance_id);
        context.appoint_worker_id = task.dispatch_option.appoint_worker_id.clone();
        context.appoint_worker_url = task.dispatch_option.appoint_worker_url.clone();

        let lookback = if self.config.lru_lookback_seconds > 0 {
            self.config.lru_lookback_seconds
        } else {
            DEFAULT_LRU_LOOKBACK_SECONDS
        };
        let worker_ids: Vec<String> = candidates.iter().map(|w| w.worker_id.clone()).collect();
        let since = Utc::now() - Duration::seconds(lookback);
        match self.statistics.latest_dispatch_since(&worker_ids, since).await {
            Ok(last_dispatched) => context.last_dispatched = last_dispatched,
            Err(e) => warn!("读取Worker下发统计失败: {}", e),
        }
        context
    }

    /// 单次下发，返回是否被接收
    async fn send(&self, worker: &Worker, task: &Task) -> bool {
        match self.rpc.send_task(worker, task).await {
            Ok(true) => {
                info!("任务 {} 已下发到Worker {}", task.task_id, worker.worker_id);
                counter!("scheduler_task_dispatch_total", "result" => "accepted").increment(1);
                if let Err(e) = self
                    .statistics
                    .record_dispatch(&worker.worker_id, Utc::now())
                    .await
                {
                    warn!("记录Worker {} 下发统计失败: {}", worker.worker_id, e);
                }
                true
            }
            Ok(false) => {
                warn!("Worker {} 拒绝任务 {}", worker.worker_id, task.task_id);
                counter!("scheduler_task_dispatch_total", "result" => "rejected").increment(1);
                false
            }
            Err(e) => {
                warn!("任务 {} 下发到Worker {} 出错: {}", task.task_id, worker.worker_id, e);
                counter!("scheduler_task_dispatch_total", "result" => "error").increment(1);
                false
            }
        }
    }
}
