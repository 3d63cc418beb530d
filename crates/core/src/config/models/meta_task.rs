use serde::{Deserialize, Serialize};

/// 元任务调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaTaskConfig {
    /// 同时执行的元任务上限
    pub max_concurrent_executions: usize,
    /// 计划加载间隔（秒）
    pub plan_load_interval_seconds: u64,
    /// 作业实例对账间隔（秒）
    pub job_check_interval_seconds: u64,
    /// 作业实例停留在 SCHEDULING 超过该时长（秒）才会被对账
    pub job_check_grace_seconds: i64,
    /// 对账分页大小
    pub job_check_page_size: usize,
    /// Worker心跳检查间隔（秒）
    pub worker_check_interval_seconds: u64,
    /// 执行中任务检查间隔（秒）
    pub task_check_interval_seconds: u64,
}

impl Default for MetaTaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 64,
            plan_load_interval_seconds: 1,
            job_check_interval_seconds: 10,
            job_check_grace_seconds: 30,
            job_check_page_size: 100,
            worker_check_interval_seconds: 5,
            task_check_interval_seconds: 5,
        }
    }
}

impl MetaTaskConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(anyhow::anyhow!("元任务最大并发数必须大于0"));
        }

        if self.plan_load_interval_seconds == 0 {
            return Err(anyhow::anyhow!("计划加载间隔必须大于0"));
        }

        if self.job_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("作业对账间隔必须大于0"));
        }

        if self.job_check_grace_seconds < 0 {
            return Err(anyhow::anyhow!("作业对账宽限时间不能为负数"));
        }

        if self.job_check_page_size == 0 {
            return Err(anyhow::anyhow!("作业对账分页大小必须大于0"));
        }

        if self.worker_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("Worker心跳检查间隔必须大于0"));
        }

        if self.task_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务执行检查间隔必须大于0"));
        }

        Ok(())
    }
}
