use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use scheduler_core::{
    Attributes, ExecuteResult, JobInstance, PlanInstance, SchedulerError, SchedulerResult,
    TaskFeedback, TriggerType,
};

use crate::strategy::ScheduleStrategy;

/// 调度引擎对外入口
#[derive(Clone)]
pub struct SchedulerProcessor {
    strategy: Arc<ScheduleStrategy>,
}

impl SchedulerProcessor {
    pub fn new(strategy: Arc<ScheduleStrategy>) -> Self {
        Self { strategy }
    }

    /// 触发计划，未满足触发条件时返回 `Ok(None)`
    #[instrument(skip(self, attributes))]
    pub async fn schedule(
        &self,
        plan_id: &str,
        trigger_type: TriggerType,
        attributes: Attributes,
        trigger_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<PlanInstance>> {
        self.strategy
            .schedule_plan(plan_id, None, trigger_type, attributes, trigger_at)
            .await
    }

    /// 调度API触发的工作流节点
    #[instrument(skip(self))]
    pub async fn schedule_job(
        &self,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<JobInstance> {
        self.strategy.api_schedule_job(plan_instance_id, job_id).await
    }

    #[instrument(skip(self))]
    pub async fn manual_schedule_job(
        &self,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<JobInstance> {
        self.strategy
            .manual_schedule_job(plan_instance_id, job_id)
            .await
    }

    /// 任务执行反馈，不支持 TERMINATED
    #[instrument(skip(self, feedback), fields(task_id = %feedback.task_id))]
    pub async fn task_feedback(&self, feedback: TaskFeedback) -> SchedulerResult<()> {
        match feedback.result {
            ExecuteResult::Succeed => self.strategy.handle_success(&feedback).await,
            ExecuteResult::Failed => self.strategy.handle_fail(&feedback).await,
            ExecuteResult::Terminated => {
                info!("拒绝任务 {} 的终止反馈", feedback.task_id);
                Err(SchedulerError::Validation(format!(
                    "任务 {} 不支持 TERMINATED 反馈",
                    feedback.task_id
                )))
            }
        }
    }
}
