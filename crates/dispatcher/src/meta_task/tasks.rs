use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    Attributes, JobStatus, MetaTaskConfig, Plan, PlanInfo, ScheduleOption, ScheduleType,
    SchedulerResult, Task, TaskFeedback, TaskStatus, TriggerType, WorkerRegistry, WorkerStatus,
};

use super::{LoopMetaTask, LoopWork, MetaTask, MetaTaskScheduler, MetaTaskType, WorkOutcome};
use crate::cluster::NodeManager;
use crate::strategy::ScheduleStrategy;

/// 单个计划的调度触发
pub struct PlanScheduleTask {
    strategy: Arc<ScheduleStrategy>,
    plan_id: String,
    version: String,
    schedule_option: ScheduleOption,
}

impl PlanScheduleTask {
    pub fn new(strategy: Arc<ScheduleStrategy>, info: &PlanInfo) -> Self {
        Self {
            strategy,
            plan_id: info.plan_id.clone(),
            version: info.version.clone(),
            schedule_option: info.schedule_option.clone(),
        }
    }
}

#[async_trait]
impl LoopWork for PlanScheduleTask {
    fn id(&self) -> String {
        self.plan_id.clone()
    }

    fn meta_type(&self) -> MetaTaskType {
        MetaTaskType::PlanSchedule
    }

    fn schedule_option(&self) -> &ScheduleOption {
        &self.schedule_option
    }

    /// 计划仍启用且版本仍为当前版本
    async fn verify(&self) -> bool {
        match self.strategy.repositories().plans.get(&self.plan_id).await {
            Ok(Some(plan)) => plan.enabled && plan.current_version == self.version,
            Ok(None) => false,
            Err(e) => {
                warn!("校验计划 {} 失败: {}", self.plan_id, e);
                false
            }
        }
    }

    /// FIXED_DELAY 计划在本次实例结束前返回 `Pending`，由实例结束时回传反馈
    async fn run(&self, trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome> {
        let created = self
            .strategy
            .schedule_plan(
                &self.plan_id,
                Some(&self.version),
                TriggerType::Schedule,
                Attributes::new(),
                trigger_at,
            )
            .await?;

        if self.schedule_option.schedule_type != ScheduleType::FixedDelay {
            return Ok(WorkOutcome::Completed);
        }
        if created.is_some() {
            return Ok(WorkOutcome::Pending);
        }
        let latest = self
            .strategy
            .repositories()
            .plan_instances
            .find_latest(&self.plan_id)
            .await?;
        Ok(match latest {
            Some(instance) if !instance.is_completed() => WorkOutcome::Pending,
            _ => WorkOutcome::Completed,
        })
    }
}

/// 定期加载本节点槽位内的启用计划，布置或撤销计划触发元任务
pub struct PlanLoadTask {
    strategy: Arc<ScheduleStrategy>,
    nodes: Arc<NodeManager>,
    schedule_option: ScheduleOption,
    /// plan_id → 已布置的版本
    armed: Mutex<HashMap<String, String>>,
}

impl PlanLoadTask {
    pub fn new(strategy: Arc<ScheduleStrategy>, nodes: Arc<NodeManager>, interval_seconds: u64) -> Self {
        Self {
            strategy,
            nodes,
            schedule_option: ScheduleOption::fixed_delay(interval_seconds),
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// 当前已布置的计划及版本
    pub async fn armed_plans(&self) -> HashMap<String, String> {
        self.armed.lock().await.clone()
    }

    async fn load(&self, plan: &Plan, armed: &mut HashMap<String, String>) -> SchedulerResult<()> {
        let scheduler = self.strategy.meta_scheduler();
        let schedule_id = MetaTaskType::PlanSchedule.schedule_id(&plan.plan_id);

        match armed.get(&plan.plan_id) {
            Some(version) if *version == plan.current_version => {
                if scheduler.is_scheduled(&schedule_id).await {
                    return Ok(());
                }
            }
            Some(version) => {
                info!(
                    "计划 {} 版本由 {} 变为 {}，重新布置",
                    plan.plan_id, version, plan.current_version
                );
                scheduler.unschedule(&schedule_id).await;
            }
            None => {}
        }

        let repositories = self.strategy.repositories();
        let Some(info) = repositories
            .plans
            .get_info(&plan.plan_id, &plan.current_version)
            .await?
        else {
            warn!("计划 {} 缺少版本 {}", plan.plan_id, plan.current_version);
            return Ok(());
        };
        armed.insert(plan.plan_id.clone(), plan.current_version.clone());
        if info.trigger_type == TriggerType::Api {
            return Ok(());
        }

        // 由最近一次实例恢复触发与反馈时间
        let latest = repositories.plan_instances.find_latest(&plan.plan_id).await?;
        let last_trigger_at = latest.as_ref().map(|i| i.trigger_at);
        let last_feedback_at = latest
            .as_ref()
            .filter(|i| i.is_completed())
            .map(|i| i.feedback_at.unwrap_or(i.trigger_at));

        let work = Arc::new(PlanScheduleTask::new(Arc::clone(&self.strategy), &info));
        let task = LoopMetaTask::resume(work, last_trigger_at, last_feedback_at);
        let next_trigger_at = task.trigger_at();
        if plan.next_trigger_at != next_trigger_at {
            repositories
                .plans
                .update_next_trigger_at(&plan.plan_id, next_trigger_at)
                .await?;
        }
        if scheduler.schedule(task).await {
            debug!("布置计划 {}，下次触发 {:?}", plan.plan_id, next_trigger_at);
        }
        Ok(())
    }
}

#[async_trait]
impl LoopWork for PlanLoadTask {
    fn id(&self) -> String {
        self.nodes.local().node_id.clone()
    }

    fn meta_type(&self) -> MetaTaskType {
        MetaTaskType::PlanLoad
    }

    fn schedule_option(&self) -> &ScheduleOption {
        &self.schedule_option
    }

    async fn run(&self, _trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome> {
        if !self.nodes.is_local_alive() {
            debug!("本节点未在线，跳过计划加载");
            return Ok(WorkOutcome::Completed);
        }

        let slots = self.strategy.slots().owned_slots();
        let plans = self
            .strategy
            .repositories()
            .plans
            .find_enabled_by_slots(&slots)
            .await?;

        let mut armed = self.armed.lock().await;
        let mut loaded = HashSet::with_capacity(plans.len());
        for plan in &plans {
            loaded.insert(plan.plan_id.clone());
            if let Err(e) = self.load(plan, &mut armed).await {
                error!("加载计划 {} 失败: {}", plan.plan_id, e);
            }
        }

        let stale: Vec<String> = armed
            .keys()
            .filter(|plan_id| !loaded.contains(*plan_id))
            .cloned()
            .collect();
        for plan_id in stale {
            armed.remove(&plan_id);
            let schedule_id = MetaTaskType::PlanSchedule.schedule_id(&plan_id);
            if self.strategy.meta_scheduler().unschedule(&schedule_id).await {
                info!("计划 {} 不再由本节点调度", plan_id);
            }
        }
        Ok(WorkOutcome::Completed)
    }
}

/// 对账：重新调度停留在 SCHEDULING 超过宽限时间的作业实例
///
/// 集群中只由按键选出的一个节点执行。
pub struct JobScheduleCheckTask {
    strategy: Arc<ScheduleStrategy>,
    nodes: Arc<NodeManager>,
    schedule_option: ScheduleOption,
    grace: Duration,
    page_size: usize,
}

impl JobScheduleCheckTask {
    pub fn new(strategy: Arc<ScheduleStrategy>, nodes: Arc<NodeManager>, config: &MetaTaskConfig) -> Self {
        Self {
            strategy,
            nodes,
            schedule_option: ScheduleOption::fixed_delay(config.job_check_interval_seconds),
            grace: Duration::seconds(config.job_check_grace_seconds),
            page_size: config.job_check_page_size.max(1),
        }
    }

    /// 扫描一轮，返回处理的作业实例数
    pub async fn check(&self) -> SchedulerResult<usize> {
        let before = Utc::now() - self.grace;
        let job_instances = &self.strategy.repositories().job_instances;

        let mut checked = 0;
        let mut after_id: Option<String> = None;
        loop {
            let page = job_instances
                .find_by_status_before(
                    JobStatus::Scheduling,
                    before,
                    after_id.as_deref(),
                    self.page_size,
                )
                .await?;
            for instance in &page {
                if let Err(e) = self.strategy.reschedule_job_instance(instance).await {
                    warn!("作业实例 {} 对账失败: {}", instance.job_instance_id, e);
                }
            }
            checked += page.len();
            if page.len() < self.page_size {
                break;
            }
            after_id = page.last().map(|i| i.job_instance_id.clone());
        }
        Ok(checked)
    }
}

#[async_trait]
impl LoopWork for JobScheduleCheckTask {
    fn id(&self) -> String {
        self.nodes.local().node_id.clone()
    }

    fn meta_type(&self) -> MetaTaskType {
        MetaTaskType::JobScheduleCheck
    }

    fn schedule_option(&self) -> &ScheduleOption {
        &self.schedule_option
    }

    async fn run(&self, _trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome> {
        let elected = self.nodes.elect(MetaTaskType::JobScheduleCheck.as_str());
        if elected.map(|n| n.node_id) != Some(self.nodes.local().node_id.clone()) {
            return Ok(WorkOutcome::Completed);
        }
        let checked = self.check().await?;
        if checked > 0 {
            info!("对账完成，处理 {} 个作业实例", checked);
        }
        Ok(WorkOutcome::Completed)
    }
}

/// Worker心跳检查
///
/// RUNNING 超过超时时间未上报心跳改为 FUSING，不再被选中；
/// FUSING 超过两倍超时时间改为 TERMINATED。集群中只由按键选出的一个节点执行。
pub struct WorkerStatusCheckTask {
    workers: Arc<dyn WorkerRegistry>,
    nodes: Arc<NodeManager>,
    schedule_option: ScheduleOption,
    timeout_seconds: i64,
}

impl WorkerStatusCheckTask {
    pub fn new(
        workers: Arc<dyn WorkerRegistry>,
        nodes: Arc<NodeManager>,
        interval_seconds: u64,
        timeout_seconds: i64,
    ) -> Self {
        Self {
            workers,
            nodes,
            schedule_option: ScheduleOption::fixed_delay(interval_seconds),
            timeout_seconds,
        }
    }

    /// 检查一轮，返回状态发生变化的Worker数
    pub async fn check(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let mut changed = 0;
        for worker in self.workers.all_workers().await? {
            let mut status = worker.status;
            if status == WorkerStatus::Running
                && worker.is_heartbeat_expired(now, self.timeout_seconds)
            {
                let fused = self
                    .workers
                    .update_status(&worker.worker_id, status, WorkerStatus::Fusing)
                    .await?;
                if !fused {
                    continue;
                }
                warn!(
                    "Worker {} 心跳超时，最近一次心跳 {}，熔断",
                    worker.worker_id, worker.metric.last_heartbeat_at
                );
                status = WorkerStatus::Fusing;
                changed += 1;
            }
            if status == WorkerStatus::Fusing
                && worker.is_heartbeat_expired(now, 2 * self.timeout_seconds)
                && self
                    .workers
                    .update_status(&worker.worker_id, status, WorkerStatus::Terminated)
                    .await?
            {
                warn!("Worker {} 长时间无心跳，终止", worker.worker_id);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl LoopWork for WorkerStatusCheckTask {
    fn id(&self) -> String {
        self.nodes.local().node_id.clone()
    }

    fn meta_type(&self) -> MetaTaskType {
        MetaTaskType::WorkerStatusCheck
    }

    fn schedule_option(&self) -> &ScheduleOption {
        &self.schedule_option
    }

    async fn run(&self, _trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome> {
        let elected = self.nodes.elect(MetaTaskType::WorkerStatusCheck.as_str());
        if elected.map(|n| n.node_id) != Some(self.nodes.local().node_id.clone()) {
            return Ok(WorkOutcome::Completed);
        }
        let changed = self.check().await?;
        if changed > 0 {
            debug!("Worker心跳检查完成，{} 个Worker状态变化", changed);
        }
        Ok(WorkOutcome::Completed)
    }
}

/// 执行检查：执行中的任务所在Worker已注销或不再存活时按失败处理
///
/// 只检查本节点槽位内计划的任务。
pub struct TaskExecuteCheckTask {
    strategy: Arc<ScheduleStrategy>,
    nodes: Arc<NodeManager>,
    schedule_option: ScheduleOption,
    page_size: usize,
}

impl TaskExecuteCheckTask {
    pub fn new(strategy: Arc<ScheduleStrategy>, nodes: Arc<NodeManager>, config: &MetaTaskConfig) -> Self {
        Self {
            strategy,
            nodes,
            schedule_option: ScheduleOption::fixed_delay(config.task_check_interval_seconds),
            page_size: config.job_check_page_size.max(1),
        }
    }

    /// 扫描一轮，返回判定失败的任务数
    pub async fn check(&self) -> SchedulerResult<usize> {
        let tasks = &self.strategy.repositories().tasks;

        let mut failed = 0;
        let mut after_id: Option<String> = None;
        loop {
            let page = tasks
                .find_by_status(TaskStatus::Executing, after_id.as_deref(), self.page_size)
                .await?;
            for task in &page {
                if !self.strategy.slots().owns_plan(&task.plan_id) {
                    continue;
                }
                let worker_id = task.worker_id.as_deref().unwrap_or_default();
                if self.is_worker_alive(worker_id).await? {
                    continue;
                }
                let feedback =
                    TaskFeedback::failed(&task.task_id, &format!("Worker {} 已下线", worker_id));
                match self.strategy.handle_fail(&feedback).await {
                    Ok(()) => failed += 1,
                    Err(e) => warn!("任务 {} 执行检查失败: {}", task.task_id, e),
                }
            }
            if page.len() < self.page_size {
                break;
            }
            after_id = page.last().map(|t| t.task_id.clone());
        }
        Ok(failed)
    }

    async fn is_worker_alive(&self, worker_id: &str) -> SchedulerResult<bool> {
        if worker_id.is_empty() {
            return Ok(false);
        }
        let worker = self.strategy.workers().get(worker_id).await?;
        Ok(worker.is_some_and(|w| w.is_alive()))
    }
}

#[async_trait]
impl LoopWork for TaskExecuteCheckTask {
    fn id(&self) -> String {
        self.nodes.local().node_id.clone()
    }

    fn meta_type(&self) -> MetaTaskType {
        MetaTaskType::TaskExecuteCheck
    }

    fn schedule_option(&self) -> &ScheduleOption {
        &self.schedule_option
    }

    async fn run(&self, _trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome> {
        if !self.nodes.is_local_alive() {
            debug!("本节点未在线，跳过任务执行检查");
            return Ok(WorkOutcome::Completed);
        }
        let failed = self.check().await?;
        if failed > 0 {
            info!("任务执行检查完成，{} 个任务因Worker下线失败", failed);
        }
        Ok(WorkOutcome::Completed)
    }
}

/// 单个任务的下发，一次性元任务
///
/// 到期后把下发投递到独立的下发并发池，立即返回，不占用元任务执行池。
pub struct TaskScheduleTask {
    strategy: Arc<ScheduleStrategy>,
    task_id: String,
    trigger_at: DateTime<Utc>,
}

impl TaskScheduleTask {
    pub fn new(strategy: Arc<ScheduleStrategy>, task: &Task) -> Self {
        Self {
            strategy,
            task_id: task.task_id.clone(),
            trigger_at: task.trigger_at,
        }
    }
}

#[async_trait]
impl MetaTask for TaskScheduleTask {
    fn schedule_id(&self) -> String {
        MetaTaskType::TaskSchedule.schedule_id(&self.task_id)
    }

    fn meta_type(&self) -> MetaTaskType {
        MetaTaskType::TaskSchedule
    }

    fn trigger_at(&self) -> Option<DateTime<Utc>> {
        Some(self.trigger_at)
    }

    async fn execute(&self, _scheduler: &MetaTaskScheduler) -> SchedulerResult<()> {
        let strategy = Arc::clone(&self.strategy);
        let permits = strategy.dispatch_permits();
        let task_id = self.task_id.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = strategy.schedule_task(&task_id).await {
                error!("任务 {} 下发出错: {}", task_id, e);
            }
        });
        Ok(())
    }
}
