use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use scheduler_core::{Attributes, SchedulerResult, Task, TaskRepository, TaskStatus};

/// 内存任务仓储
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// 仅当当前状态属于 `from` 时修改
    async fn transit<F>(&self, task_id: &str, from: &[TaskStatus], update: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) if from.contains(&task.status) => {
                update(task);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn save_all(&self, tasks: &[Task]) -> SchedulerResult<()> {
        let mut store = self.tasks.write().await;
        for task in tasks {
            store.insert(task.task_id.clone(), task.clone());
        }
        Ok(())
    }

    async fn find_by_job_instance(&self, job_instance_id: &str) -> SchedulerResult<Vec<Task>> {
        let mut result: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.job_instance_id == job_instance_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(result)
    }

    async fn dispatching(&self, task_id: &str) -> SchedulerResult<bool> {
        Ok(self
            .transit(task_id, &[TaskStatus::Scheduling], |task| {
                task.status = TaskStatus::Dispatching;
            })
            .await)
    }

    async fn executing(
        &self,
        task_id: &str,
        worker_id: &str,
        start_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        Ok(self
            .transit(task_id, &[TaskStatus::Dispatching], |task| {
                task.status = TaskStatus::Executing;
                task.worker_id = Some(worker_id.to_string());
                task.start_at = Some(start_at);
            })
            .await)
    }

    async fn success(
        &self,
        task_id: &str,
        end_at: DateTime<Utc>,
        context: &Attributes,
        result: Option<serde_json::Value>,
    ) -> SchedulerResult<bool> {
        Ok(self
            .transit(
                task_id,
                &[TaskStatus::Dispatching, TaskStatus::Executing],
                |task| {
                    task.status = TaskStatus::Succeed;
                    task.end_at = Some(end_at);
                    task.context = context.clone();
                    task.result = result;
                },
            )
            .await)
    }

    async fn fail(
        &self,
        task_id: &str,
        end_at: DateTime<Utc>,
        error_msg: &str,
        error_stack_trace: Option<&str>,
    ) -> SchedulerResult<bool> {
        Ok(self
            .transit(
                task_id,
                &[
                    TaskStatus::Scheduling,
                    TaskStatus::Dispatching,
                    TaskStatus::Executing,
                ],
                |task| {
                    task.status = TaskStatus::Failed;
                    task.end_at = Some(end_at);
                    task.error_msg = Some(error_msg.to_string());
                    task.error_stack_trace = error_stack_trace.map(str::to_string);
                },
            )
            .await)
    }

    async fn reset_dispatching(&self, task_id: &str) -> SchedulerResult<bool> {
        Ok(self
            .transit(task_id, &[TaskStatus::Dispatching], |task| {
                task.status = TaskStatus::Scheduling;
            })
            .await)
    }

    async fn find_by_status(
        &self,
        status: TaskStatus,
        after_id: Option<&str>,
        limit: usize,
    ) -> SchedulerResult<Vec<Task>> {
        let mut result: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .filter(|t| after_id.map_or(true, |after| t.task_id.as_str() > after))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        result.truncate(limit);
        Ok(result)
    }
}
