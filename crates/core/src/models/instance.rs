use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    Attributes, DispatchOption, JobInfo, JobType, PlanType, RetryOption, ScheduleType,
    TriggerType,
};

/// 计划实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlanStatus {
    #[serde(rename = "SCHEDULING")]
    Scheduling,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "SUCCEED")]
    Succeed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl PlanStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, PlanStatus::Succeed | PlanStatus::Failed)
    }
}

/// 作业实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "SCHEDULING")]
    Scheduling,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "SUCCEED")]
    Succeed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobStatus::Succeed | JobStatus::Failed)
    }
}

/// 计划的一次触发
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInstance {
    pub plan_instance_id: String,
    pub plan_id: String,
    pub version: String,
    pub plan_type: PlanType,
    pub schedule_type: ScheduleType,
    pub trigger_type: TriggerType,
    pub status: PlanStatus,
    pub trigger_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub feedback_at: Option<DateTime<Utc>>,
    /// 本次触发中所有作业实例共享的上下文
    pub context: Attributes,
}

impl PlanInstance {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

/// DAG节点在一次触发中的执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub job_instance_id: String,
    pub plan_instance_id: String,
    pub plan_id: String,
    pub plan_version: String,
    pub plan_type: PlanType,
    pub job_id: String,
    pub job_type: JobType,
    pub executor_name: String,
    pub dispatch_option: DispatchOption,
    pub retry_option: RetryOption,
    /// 已重试次数
    pub retry_times: u32,
    pub terminate_with_fail: bool,
    pub status: JobStatus,
    pub trigger_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    /// 计划上下文与作业静态属性合并后的参数
    pub attributes: Attributes,
    /// 执行过程中任务回传的上下文
    pub context: Attributes,
    pub error_msg: Option<String>,
}

impl JobInstance {
    /// 由作业定义创建，初始状态为 SCHEDULING
    pub fn from_job(
        job_instance_id: String,
        plan_instance: &PlanInstance,
        job: &JobInfo,
        attributes: Attributes,
        trigger_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_instance_id,
            plan_instance_id: plan_instance.plan_instance_id.clone(),
            plan_id: plan_instance.plan_id.clone(),
            plan_version: plan_instance.version.clone(),
            plan_type: plan_instance.plan_type,
            job_id: job.id.clone(),
            job_type: job.job_type,
            executor_name: job.executor_name.clone(),
            dispatch_option: job.dispatch_option.clone(),
            retry_option: job.retry_option,
            retry_times: 0,
            terminate_with_fail: job.terminate_with_fail,
            status: JobStatus::Scheduling,
            trigger_at,
            start_at: None,
            end_at: None,
            attributes,
            context: Attributes::new(),
            error_msg: None,
        }
    }

    /// 成功，或失败但不要求终止下游
    pub fn is_success_or_ignorable(&self) -> bool {
        match self.status {
            JobStatus::Succeed => true,
            JobStatus::Failed => !self.terminate_with_fail,
            _ => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_times < self.retry_option.retry
    }
}
