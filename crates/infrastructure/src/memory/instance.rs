use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use scheduler_core::{
    merge_attributes, Attributes, JobInstance, JobInstanceRepository, JobStatus, PlanInstance,
    PlanInstanceRepository, PlanStatus, SchedulerResult,
};

/// 内存计划实例仓储
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanInstanceRepository {
    instances: Arc<RwLock<HashMap<String, PlanInstance>>>,
}

impl InMemoryPlanInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find_by_plan(&self, plan_id: &str) -> Vec<PlanInstance> {
        let mut result: Vec<PlanInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.plan_id == plan_id)
            .cloned()
            .collect();
        result.sort_by_key(|i| i.trigger_at);
        result
    }
}

#[async_trait]
impl PlanInstanceRepository for InMemoryPlanInstanceRepository {
    async fn get(&self, plan_instance_id: &str) -> SchedulerResult<Option<PlanInstance>> {
        Ok(self.instances.read().await.get(plan_instance_id).cloned())
    }

    async fn save(&self, instance: &PlanInstance) -> SchedulerResult<()> {
        self.instances
            .write()
            .await
            .insert(instance.plan_instance_id.clone(), instance.clone());
        Ok(())
    }

    async fn find_latest(&self, plan_id: &str) -> SchedulerResult<Option<PlanInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.plan_id == plan_id)
            .max_by_key(|i| i.trigger_at)
            .cloned())
    }

    async fn find_by_trigger_at(
        &self,
        plan_id: &str,
        trigger_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<PlanInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .find(|i| i.plan_id == plan_id && i.trigger_at == trigger_at)
            .cloned())
    }

    async fn execute(
        &self,
        plan_instance_id: &str,
        start_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(plan_instance_id) {
            Some(instance) if instance.status == PlanStatus::Scheduling => {
                instance.status = PlanStatus::Executing;
                instance.start_at = Some(start_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        plan_instance_id: &str,
        status: PlanStatus,
        feedback_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(plan_instance_id) {
            Some(instance) if !instance.status.is_completed() && status.is_completed() => {
                instance.status = status;
                instance.feedback_at = Some(feedback_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn merge_context(
        &self,
        plan_instance_id: &str,
        context: &Attributes,
    ) -> SchedulerResult<()> {
        if let Some(instance) = self.instances.write().await.get_mut(plan_instance_id) {
            merge_attributes(&mut instance.context, context);
        }
        Ok(())
    }
}

/// 内存作业实例仓储
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobInstanceRepository {
    instances: Arc<RwLock<HashMap<String, JobInstance>>>,
}

impl InMemoryJobInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<JobInstance> {
        self.instances.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobInstanceRepository for InMemoryJobInstanceRepository {
    async fn get(&self, job_instance_id: &str) -> SchedulerResult<Option<JobInstance>> {
        Ok(self.instances.read().await.get(job_instance_id).cloned())
    }

    async fn save(&self, instance: &JobInstance) -> SchedulerResult<()> {
        self.instances
            .write()
            .await
            .insert(instance.job_instance_id.clone(), instance.clone());
        Ok(())
    }

    async fn find_by_plan_instance(
        &self,
        plan_instance_id: &str,
    ) -> SchedulerResult<Vec<JobInstance>> {
        let mut result: Vec<JobInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.plan_instance_id == plan_instance_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.trigger_at
                .cmp(&b.trigger_at)
                .then(a.retry_times.cmp(&b.retry_times))
        });
        Ok(result)
    }

    async fn find_by_plan_instance_and_job(
        &self,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<Vec<JobInstance>> {
        let mut result = self.find_by_plan_instance(plan_instance_id).await?;
        result.retain(|i| i.job_id == job_id);
        Ok(result)
    }

    async fn execute(
        &self,
        job_instance_id: &str,
        start_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(job_instance_id) {
            Some(instance) if instance.status == JobStatus::Scheduling => {
                instance.status = JobStatus::Executing;
                instance.start_at = Some(start_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn success(
        &self,
        job_instance_id: &str,
        end_at: DateTime<Utc>,
        context: &Attributes,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(job_instance_id) {
            Some(instance) if instance.status == JobStatus::Executing => {
                instance.status = JobStatus::Succeed;
                instance.end_at = Some(end_at);
                instance.context = context.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(
        &self,
        job_instance_id: &str,
        end_at: DateTime<Utc>,
        error_msg: &str,
    ) -> SchedulerResult<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(job_instance_id) {
            Some(instance) if !instance.status.is_completed() => {
                instance.status = JobStatus::Failed;
                instance.end_at = Some(end_at);
                instance.error_msg = Some(error_msg.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_status_before(
        &self,
        status: JobStatus,
        trigger_before: DateTime<Utc>,
        after_id: Option<&str>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobInstance>> {
        let mut result: Vec<JobInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.status == status && i.trigger_at < trigger_before)
            .filter(|i| after_id.map_or(true, |after| i.job_instance_id.as_str() > after))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.job_instance_id.cmp(&b.job_instance_id));
        result.truncate(limit);
        Ok(result)
    }
}
