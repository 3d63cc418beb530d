use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::MetaTask;

struct Entry {
    task: Arc<dyn MetaTask>,
    /// 每次布置定时器时递增，用于识别过期的定时器与执行
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Entry {
    fn cancel(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

struct Inner {
    registry: RwLock<HashMap<String, Entry>>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    generation: AtomicU64,
    stopped: AtomicBool,
}

/// 元任务调度器
///
/// 登记表归调度器所有，定时由 tokio 计时器驱动，到期的元任务投递到
/// 有界执行池运行，执行过程不受取消定时器影响。执行出错的元任务会被移出登记表。
#[derive(Clone)]
pub struct MetaTaskScheduler {
    inner: Arc<Inner>,
}

impl MetaTaskScheduler {
    pub fn new(max_concurrent_executions: usize) -> Self {
        let pool_size = max_concurrent_executions.max(1);
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(HashMap::new()),
                pool: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                generation: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// 登记元任务并布置定时器
    ///
    /// `schedule_id` 已登记、校验不通过或没有触发时间时不做任何事，返回 `false`。
    pub async fn schedule(&self, task: Arc<dyn MetaTask>) -> bool {
        if self.is_stopped() {
            return false;
        }

        let schedule_id = task.schedule_id();
        if self.is_scheduled(&schedule_id).await {
            debug!("元任务 {} 已在调度中，忽略", schedule_id);
            return false;
        }
        if !task.verify().await {
            debug!("元任务 {} 校验未通过，不调度", schedule_id);
            return false;
        }

        let mut registry = self.inner.registry.write().await;
        if registry.contains_key(&schedule_id) {
            return false;
        }
        self.arm(&mut registry, schedule_id, task)
    }

    /// 重新计算触发时间并布置定时器，不检查是否已登记
    pub async fn reschedule(&self, task: Arc<dyn MetaTask>) -> bool {
        if self.is_stopped() {
            return false;
        }
        let schedule_id = task.schedule_id();
        let mut registry = self.inner.registry.write().await;
        self.arm(&mut registry, schedule_id, task)
    }

    /// 取消并移出登记表
    pub async fn unschedule(&self, schedule_id: &str) -> bool {
        match self.inner.registry.write().await.remove(schedule_id) {
            Some(entry) => {
                debug!("取消元任务 {}", schedule_id);
                entry.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, schedule_id: &str) -> bool {
        self.inner.registry.read().await.contains_key(schedule_id)
    }

    pub async fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.registry.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 向等待反馈的元任务投递反馈，被接受后立即重新布置
    pub async fn feedback(&self, schedule_id: &str, feedback_at: DateTime<Utc>) -> bool {
        let task = match self.inner.registry.read().await.get(schedule_id) {
            Some(entry) => entry.task.clone(),
            None => return false,
        };
        if !task.on_feedback(feedback_at) {
            debug!("元任务 {} 未在等待反馈", schedule_id);
            return false;
        }
        self.reschedule(task).await
    }

    /// 停止调度：取消全部定时器，清空登记表，等待执行中的元任务结束
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let entries: Vec<Entry> = self
            .inner
            .registry
            .write()
            .await
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let cancelled = entries.len();
        for entry in entries {
            entry.cancel();
        }

        match self.inner.pool.acquire_many(self.inner.pool_size as u32).await {
            Ok(_permits) => {}
            Err(e) => warn!("等待元任务执行结束失败: {}", e),
        }
        self.inner.pool.close();
        info!("元任务调度器已停止，取消 {} 个元任务", cancelled);
    }

    fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn arm(
        &self,
        registry: &mut HashMap<String, Entry>,
        schedule_id: String,
        task: Arc<dyn MetaTask>,
    ) -> bool {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = match task.trigger_at() {
            Some(trigger_at) => {
                debug!(
                    "布置元任务 {} ({})，触发时间 {}",
                    schedule_id,
                    task.meta_type(),
                    trigger_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                Some(self.spawn_timer(schedule_id.clone(), generation, trigger_at))
            }
            None if task.is_awaiting_feedback() => {
                debug!("元任务 {} 等待反馈", schedule_id);
                None
            }
            None => {
                debug!("元任务 {} 没有下次触发时间，移出调度", schedule_id);
                if let Some(old) = registry.remove(&schedule_id) {
                    old.cancel();
                }
                return false;
            }
        };

        let entry = Entry {
            task,
            generation,
            timer,
        };
        if let Some(old) = registry.insert(schedule_id, entry) {
            old.cancel();
        }
        true
    }

    fn spawn_timer(
        &self,
        schedule_id: String,
        generation: u64,
        trigger_at: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        let delay = (trigger_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(schedule_id, generation).await;
        })
    }

    async fn fire(&self, schedule_id: String, generation: u64) {
        let task = match self.inner.registry.read().await.get(&schedule_id) {
            Some(entry) if entry.generation == generation => entry.task.clone(),
            _ => return,
        };
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run(schedule_id, generation, task).await;
        });
    }

    async fn run(&self, schedule_id: String, generation: u64, task: Arc<dyn MetaTask>) {
        let Ok(_permit) = self.inner.pool.clone().acquire_owned().await else {
            return;
        };

        let result = task.execute(self).await;

        let mut registry = self.inner.registry.write().await;
        match result {
            Err(e) => {
                error!("元任务 {} 执行失败，移出调度: {}", schedule_id, e);
                if let Some(entry) = registry.remove(&schedule_id) {
                    entry.cancel();
                }
            }
            Ok(()) => {
                let unchanged = matches!(
                    registry.get(&schedule_id),
                    Some(entry) if entry.generation == generation
                );
                if unchanged && !task.is_awaiting_feedback() {
                    registry.remove(&schedule_id);
                }
            }
        }
    }
}
