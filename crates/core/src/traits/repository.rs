//! 数据仓储层接口定义
//!
//! 调度引擎只依赖这些抽象，持久化实现由外部提供：
//! - [`PlanRepository`] - 计划及版本快照，版本更新使用CAS
//! - [`PlanInstanceRepository`] - 计划实例
//! - [`JobInstanceRepository`] - 作业实例，含对账扫描查询
//! - [`TaskRepository`] - 任务，含执行检查扫描查询
//!
//! ## 条件更新
//!
//! 所有状态迁移方法都是条件更新：只有当前状态符合预期时才会修改，
//! 返回 `true` 表示本次调用完成了迁移。并发的重复反馈因此只有一个能推进状态机。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Attributes, JobInstance, JobStatus, Plan, PlanInfo, PlanInstance, PlanStatus, Task,
    TaskStatus,
};
use crate::SchedulerResult;

/// 计划仓储接口
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn get(&self, plan_id: &str) -> SchedulerResult<Option<Plan>>;

    async fn get_info(&self, plan_id: &str, version: &str) -> SchedulerResult<Option<PlanInfo>>;

    /// 新建计划及其首个版本
    async fn create(&self, plan: &Plan, info: &PlanInfo) -> SchedulerResult<()>;

    /// 保存版本快照，快照一经保存不再修改
    async fn save_info(&self, info: &PlanInfo) -> SchedulerResult<()>;

    /// 删除未被任何计划引用的版本快照
    async fn delete_info(&self, plan_id: &str, version: &str) -> SchedulerResult<()>;

    /// 当 `(current_version, recently_version)` 与预期一致时切换到新版本
    async fn update_version(
        &self,
        plan_id: &str,
        expected_current: &str,
        expected_recently: &str,
        new_version: &str,
    ) -> SchedulerResult<bool>;

    async fn update_enabled(&self, plan_id: &str, enabled: bool) -> SchedulerResult<bool>;

    async fn update_next_trigger_at(
        &self,
        plan_id: &str,
        next_trigger_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()>;

    /// 查询落在指定槽位内的启用计划
    async fn find_enabled_by_slots(&self, slots: &[u32]) -> SchedulerResult<Vec<Plan>>;
}

/// 计划实例仓储接口
#[async_trait]
pub trait PlanInstanceRepository: Send + Sync {
    async fn get(&self, plan_instance_id: &str) -> SchedulerResult<Option<PlanInstance>>;

    async fn save(&self, instance: &PlanInstance) -> SchedulerResult<()>;

    /// 按触发时间取最近一次实例
    async fn find_latest(&self, plan_id: &str) -> SchedulerResult<Option<PlanInstance>>;

    async fn find_by_trigger_at(
        &self,
        plan_id: &str,
        trigger_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<PlanInstance>>;

    /// SCHEDULING → EXECUTING
    async fn execute(&self, plan_instance_id: &str, start_at: DateTime<Utc>)
        -> SchedulerResult<bool>;

    /// 未完成 → SUCCEED / FAILED
    async fn complete(
        &self,
        plan_instance_id: &str,
        status: PlanStatus,
        feedback_at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    async fn merge_context(
        &self,
        plan_instance_id: &str,
        context: &Attributes,
    ) -> SchedulerResult<()>;
}

/// 作业实例仓储接口
#[async_trait]
pub trait JobInstanceRepository: Send + Sync {
    async fn get(&self, job_instance_id: &str) -> SchedulerResult<Option<JobInstance>>;

    async fn save(&self, instance: &JobInstance) -> SchedulerResult<()>;

    async fn find_by_plan_instance(
        &self,
        plan_instance_id: &str,
    ) -> SchedulerResult<Vec<JobInstance>>;

    /// 同一作业可能因重试存在多个实例，按触发时间升序返回
    async fn find_by_plan_instance_and_job(
        &self,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<Vec<JobInstance>>;

    /// SCHEDULING → EXECUTING
    async fn execute(&self, job_instance_id: &str, start_at: DateTime<Utc>)
        -> SchedulerResult<bool>;

    /// EXECUTING → SUCCEED，同时写入执行上下文
    async fn success(
        &self,
        job_instance_id: &str,
        end_at: DateTime<Utc>,
        context: &Attributes,
    ) -> SchedulerResult<bool>;

    /// 未完成 → FAILED
    async fn fail(
        &self,
        job_instance_id: &str,
        end_at: DateTime<Utc>,
        error_msg: &str,
    ) -> SchedulerResult<bool>;

    /// 对账扫描：指定状态且触发时间早于 `trigger_before` 的实例，按ID升序分页
    async fn find_by_status_before(
        &self,
        status: JobStatus,
        trigger_before: DateTime<Utc>,
        after_id: Option<&str>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobInstance>>;
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>>;

    async fn save_all(&self, tasks: &[Task]) -> SchedulerResult<()>;

    async fn find_by_job_instance(&self, job_instance_id: &str) -> SchedulerResult<Vec<Task>>;

    /// SCHEDULING → DISPATCHING
    async fn dispatching(&self, task_id: &str) -> SchedulerResult<bool>;

    /// DISPATCHING → EXECUTING，记录执行的Worker
    async fn executing(
        &self,
        task_id: &str,
        worker_id: &str,
        start_at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// DISPATCHING / EXECUTING → SUCCEED
    async fn success(
        &self,
        task_id: &str,
        end_at: DateTime<Utc>,
        context: &Attributes,
        result: Option<serde_json::Value>,
    ) -> SchedulerResult<bool>;

    /// 未完成 → FAILED
    async fn fail(
        &self,
        task_id: &str,
        end_at: DateTime<Utc>,
        error_msg: &str,
        error_stack_trace: Option<&str>,
    ) -> SchedulerResult<bool>;

    /// DISPATCHING → SCHEDULING，对账时重新下发
    async fn reset_dispatching(&self, task_id: &str) -> SchedulerResult<bool>;

    /// 指定状态的任务，按ID升序分页
    async fn find_by_status(
        &self,
        status: TaskStatus,
        after_id: Option<&str>,
        limit: usize,
    ) -> SchedulerResult<Vec<Task>>;
}
