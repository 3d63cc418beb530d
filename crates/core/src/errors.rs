use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("DAG存在环: 节点 {node_id}")]
    CyclicGraph { node_id: String },

    #[error("DAG节点 {node_id} 引用了不存在的子节点 {child_id}")]
    DanglingReference { node_id: String, child_id: String },

    #[error("没有可用的Worker: {0}")]
    NoWorkerAvailable(String),

    #[error("任务下发失败: worker={worker_id} - {message}")]
    Dispatch { worker_id: String, message: String },

    #[error("前置条件不满足: {0}")]
    PreconditionNotMet(String),

    #[error("计划版本已过期: {plan_id} 期望版本 {expected}")]
    StaleVersion { plan_id: String, expected: String },

    #[error("不支持的调度类型: {0}")]
    UnsupportedScheduleType(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("计划未找到: {id}")]
    PlanNotFound { id: String },

    #[error("计划实例未找到: {id}")]
    PlanInstanceNotFound { id: String },

    #[error("作业实例未找到: {id}")]
    JobInstanceNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 仅下发类错误允许在本地重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::Dispatch { .. } | SchedulerError::Network(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
