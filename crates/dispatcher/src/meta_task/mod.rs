//! 元任务调度
//!
//! 元任务是调度节点内部的定时簿记单元（计划触发、计划加载、作业对账、任务下发、
//! Worker心跳检查、执行中任务检查），
//! 与下发给Worker的用户任务不同。所有元任务登记在 [`MetaTaskScheduler`] 中，
//! 以 `schedule_id` 唯一标识，到期后投递到有界执行池运行。

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scheduler_core::SchedulerResult;

mod loop_task;
mod scheduler;
mod tasks;

pub use loop_task::{LoopMetaTask, LoopPhase, LoopWork, WorkOutcome};
pub use scheduler::MetaTaskScheduler;
pub use tasks::{
    JobScheduleCheckTask, PlanLoadTask, PlanScheduleTask, TaskExecuteCheckTask, TaskScheduleTask,
    WorkerStatusCheckTask,
};

/// 元任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaTaskType {
    PlanLoad,
    PlanSchedule,
    JobScheduleCheck,
    TaskSchedule,
    WorkerStatusCheck,
    TaskExecuteCheck,
}

impl MetaTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaTaskType::PlanLoad => "plan-load",
            MetaTaskType::PlanSchedule => "plan-schedule",
            MetaTaskType::JobScheduleCheck => "job-schedule-check",
            MetaTaskType::TaskSchedule => "task-schedule",
            MetaTaskType::WorkerStatusCheck => "worker-status-check",
            MetaTaskType::TaskExecuteCheck => "task-execute-check",
        }
    }

    /// 由类型与实体ID拼出调度ID
    pub fn schedule_id(&self, entity_id: &str) -> String {
        format!("{}-{}", self.as_str(), entity_id)
    }
}

impl fmt::Display for MetaTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait MetaTask: Send + Sync {
    fn schedule_id(&self) -> String;

    fn meta_type(&self) -> MetaTaskType;

    /// 下次触发时间，`None` 表示不再触发
    fn trigger_at(&self) -> Option<DateTime<Utc>>;

    /// 登记前校验，不通过则不登记
    async fn verify(&self) -> bool {
        true
    }

    async fn execute(&self, scheduler: &MetaTaskScheduler) -> SchedulerResult<()>;

    /// 是否在等待外部反馈，等待期间保留登记但不布置定时器
    fn is_awaiting_feedback(&self) -> bool {
        false
    }

    /// 接收外部反馈，返回是否被接受
    fn on_feedback(&self, _feedback_at: DateTime<Utc>) -> bool {
        false
    }
}
