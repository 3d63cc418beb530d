use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Attributes, DispatchOption, JobInstance, TagFilter};

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "BROADCAST")]
    Broadcast,
    #[serde(rename = "SPLIT")]
    Split,
    #[serde(rename = "MAP")]
    Map,
    #[serde(rename = "REDUCE")]
    Reduce,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "SCHEDULING")]
    Scheduling,
    #[serde(rename = "DISPATCHING")]
    Dispatching,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "SUCCEED")]
    Succeed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl TaskStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Succeed | TaskStatus::Failed)
    }
}

/// 下发给Worker的最小执行单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub job_instance_id: String,
    pub plan_instance_id: String,
    pub plan_id: String,
    pub job_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// 广播任务创建时即确定Worker，其余任务下发成功后填充
    pub worker_id: Option<String>,
    pub executor_name: String,
    pub dispatch_option: DispatchOption,
    pub attributes: Attributes,
    pub context: Attributes,
    /// MAP 任务的分片参数
    pub map_attributes: Option<Attributes>,
    /// REDUCE 任务汇总的 MAP 结果
    #[serde(default)]
    pub reduce_attributes: Vec<Attributes>,
    /// 执行结果，SPLIT 任务为分片列表，MAP 任务为分片结果
    pub result: Option<serde_json::Value>,
    pub error_msg: Option<String>,
    pub error_stack_trace: Option<String>,
    pub trigger_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

impl Task {
    /// 基于作业实例创建任务，初始状态为 SCHEDULING
    pub fn for_job_instance(task_id: String, instance: &JobInstance, task_type: TaskType) -> Self {
        Self {
            task_id,
            job_instance_id: instance.job_instance_id.clone(),
            plan_instance_id: instance.plan_instance_id.clone(),
            plan_id: instance.plan_id.clone(),
            job_id: instance.job_id.clone(),
            task_type,
            status: TaskStatus::Scheduling,
            worker_id: None,
            executor_name: instance.executor_name.clone(),
            dispatch_option: instance.dispatch_option.clone(),
            attributes: instance.attributes.clone(),
            context: instance.context.clone(),
            map_attributes: None,
            reduce_attributes: Vec::new(),
            result: None,
            error_msg: None,
            error_stack_trace: None,
            trigger_at: instance.trigger_at,
            start_at: None,
            end_at: None,
        }
    }

    pub fn tag_filters(&self) -> &[TagFilter] {
        &self.dispatch_option.tag_filters
    }
}

/// 任务执行结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecuteResult {
    #[serde(rename = "SUCCEED")]
    Succeed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TERMINATED")]
    Terminated,
}

/// Worker回传的任务反馈
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFeedback {
    pub task_id: String,
    pub result: ExecuteResult,
    /// 合并进作业上下文的数据
    #[serde(default)]
    pub context: Attributes,
    /// MAP 任务的结果，REDUCE 时汇总
    #[serde(default)]
    pub result_attributes: Attributes,
    /// SPLIT 任务拆分出的分片参数
    #[serde(default)]
    pub map_task_attributes: Vec<Attributes>,
    pub error_msg: Option<String>,
    pub error_stack_trace: Option<String>,
}

impl TaskFeedback {
    pub fn succeed(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            result: ExecuteResult::Succeed,
            context: Attributes::new(),
            result_attributes: Attributes::new(),
            map_task_attributes: Vec::new(),
            error_msg: None,
            error_stack_trace: None,
        }
    }

    pub fn failed(task_id: &str, error_msg: &str) -> Self {
        Self {
            result: ExecuteResult::Failed,
            error_msg: Some(error_msg.to_string()),
            ..Self::succeed(task_id)
        }
    }
}
