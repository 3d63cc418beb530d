//! 编排状态机
//!
//! 计划触发 → 计划实例 → 作业实例 → 任务，以及任务反馈后的DAG推进。
//!
//! 同一计划的状态迁移在计划锁内串行执行，仓储的条件更新保证重复反馈只推进一次。
//! 作业完成后的后续处理放入工作队列逐个处理，新建的任务在释放计划锁后再投递下发。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use metrics::counter;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use scheduler_core::utils::generate_id;
use scheduler_core::{
    merge_attributes, merged, Attributes, JobInfo, JobInstance, JobInstanceRepository, JobStatus,
    JobType, PlanInfo, PlanInstance, PlanInstanceRepository, PlanJobs, PlanRepository,
    PlanStatus, ScheduleType, SchedulerError, SchedulerResult, Task, TaskFeedback,
    TaskRepository, TaskStatus, TaskType, TriggerType, WorkerRegistry,
};

use crate::cluster::SlotManager;
use crate::lock::KeyedMutex;
use crate::meta_task::{MetaTaskScheduler, MetaTaskType, TaskScheduleTask};
use crate::task_dispatcher::{DispatchOutcome, TaskDispatcher};
use crate::task_factory::{TaskCreateContext, TaskFactory};

/// 编排使用的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub plans: Arc<dyn PlanRepository>,
    pub plan_instances: Arc<dyn PlanInstanceRepository>,
    pub job_instances: Arc<dyn JobInstanceRepository>,
    pub tasks: Arc<dyn TaskRepository>,
}

/// 作业实例结束后需要继续处理的事件
#[derive(Debug)]
enum JobEvent {
    /// 成功，或失败但不终止下游
    Passed(JobInstance),
    /// 失败且要求终止下游
    Failed(JobInstance),
}

/// 一次状态迁移中新建、待下发的任务
type Pending = Vec<Task>;

pub struct ScheduleStrategy {
    repositories: Repositories,
    workers: Arc<dyn WorkerRegistry>,
    slots: Arc<SlotManager>,
    dispatcher: Arc<TaskDispatcher>,
    meta_scheduler: MetaTaskScheduler,
    factory: TaskFactory,
    plan_locks: KeyedMutex,
    dispatch_permits: Arc<Semaphore>,
    dispatch_capacity: usize,
}

impl ScheduleStrategy {
    pub fn new(
        repositories: Repositories,
        workers: Arc<dyn WorkerRegistry>,
        slots: Arc<SlotManager>,
        dispatcher: Arc<TaskDispatcher>,
        meta_scheduler: MetaTaskScheduler,
        max_concurrent_dispatches: usize,
    ) -> Self {
        Self {
            repositories,
            workers,
            slots,
            dispatcher,
            meta_scheduler,
            factory: TaskFactory::new(),
            plan_locks: KeyedMutex::new(),
            dispatch_permits: Arc::new(Semaphore::new(max_concurrent_dispatches.max(1))),
            dispatch_capacity: max_concurrent_dispatches.max(1),
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    pub fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }

    pub fn workers(&self) -> &Arc<dyn WorkerRegistry> {
        &self.workers
    }

    pub fn meta_scheduler(&self) -> &MetaTaskScheduler {
        &self.meta_scheduler
    }

    pub(crate) fn dispatch_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.dispatch_permits)
    }

    /// 等待进行中的下发结束，之后不再接受新的下发
    pub async fn drain_dispatches(&self) {
        match self
            .dispatch_permits
            .acquire_many(self.dispatch_capacity as u32)
            .await
        {
            Ok(_permits) => debug!("进行中的下发已全部结束"),
            Err(e) => debug!("下发许可已关闭: {}", e),
        }
        self.dispatch_permits.close();
    }

    /// 触发计划
    ///
    /// `version` 为空时使用当前版本。调度触发需要满足版本、槽位与去重条件，
    /// 不满足时返回 `Ok(None)`；计划不存在返回 `PlanNotFound`。
    pub async fn schedule_plan(
        self: &Arc<Self>,
        plan_id: &str,
        version: Option<&str>,
        trigger_type: TriggerType,
        attributes: Attributes,
        trigger_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<PlanInstance>> {
        let mut pending = Pending::new();
        let created = {
            let _guard = self.plan_locks.lock(plan_id).await;
            let plan = self
                .repositories
                .plans
                .get(plan_id)
                .await?
                .ok_or_else(|| SchedulerError::PlanNotFound {
                    id: plan_id.to_string(),
                })?;
            if !plan.enabled {
                info!("计划 {} 已停用，不触发", plan_id);
                return Ok(None);
            }

            let version = version.unwrap_or(&plan.current_version);
            if trigger_type == TriggerType::Schedule {
                if version != plan.current_version {
                    debug!(
                        "计划 {} 版本 {} 已不是当前版本 {}",
                        plan_id, version, plan.current_version
                    );
                    return Ok(None);
                }
                if !self.slots.owns(plan.slot) {
                    debug!("计划 {} 槽位 {} 不归本节点", plan_id, plan.slot);
                    return Ok(None);
                }
            }

            let info = self
                .repositories
                .plans
                .get_info(plan_id, version)
                .await?
                .ok_or_else(|| SchedulerError::PlanNotFound {
                    id: format!("{plan_id}@{version}"),
                })?;

            if trigger_type == TriggerType::Schedule
                && !self.can_fire(&info, trigger_at).await?
            {
                return Ok(None);
            }

            let instance = self
                .create_plan_instance(&info, trigger_type, attributes, trigger_at, &mut pending)
                .await?;
            Some(instance)
        };

        self.launch(pending).await;
        Ok(created)
    }

    /// 调度触发的去重与调度窗口检查
    async fn can_fire(&self, info: &PlanInfo, trigger_at: DateTime<Utc>) -> SchedulerResult<bool> {
        let option = &info.schedule_option;
        if option.is_expired_at(trigger_at) {
            info!("计划 {} 触发时间 {} 已超出调度窗口", info.plan_id, trigger_at);
            return Ok(false);
        }

        let instances = &self.repositories.plan_instances;
        match option.schedule_type {
            ScheduleType::Cron | ScheduleType::FixedRate => {
                if instances
                    .find_by_trigger_at(&info.plan_id, trigger_at)
                    .await?
                    .is_some()
                {
                    debug!("计划 {} 在 {} 已触发过", info.plan_id, trigger_at);
                    return Ok(false);
                }
            }
            ScheduleType::FixedDelay => {
                if let Some(latest) = instances.find_latest(&info.plan_id).await? {
                    if !latest.is_completed() {
                        debug!(
                            "计划 {} 上次实例 {} 尚未结束",
                            info.plan_id, latest.plan_instance_id
                        );
                        return Ok(false);
                    }
                }
            }
            _ => {}
        }
        Ok(true)
    }

    async fn create_plan_instance(
        &self,
        info: &PlanInfo,
        trigger_type: TriggerType,
        attributes: Attributes,
        trigger_at: DateTime<Utc>,
        pending: &mut Pending,
    ) -> SchedulerResult<PlanInstance> {
        let instance = PlanInstance {
            plan_instance_id: generate_id("plan_instance"),
            plan_id: info.plan_id.clone(),
            version: info.version.clone(),
            plan_type: info.plan_type(),
            schedule_type: info.schedule_option.schedule_type,
            trigger_type,
            status: PlanStatus::Scheduling,
            trigger_at,
            start_at: None,
            feedback_at: None,
            context: attributes,
        };
        self.repositories.plan_instances.save(&instance).await?;
        info!(
            "创建计划实例 {} (计划 {} 版本 {})",
            instance.plan_instance_id, info.plan_id, info.version
        );

        let mut events = VecDeque::new();
        match &info.jobs {
            PlanJobs::Single(job) => {
                let (_, event) = self
                    .create_job_instance(&instance, job, trigger_at, 0, pending)
                    .await?;
                events.extend(event);
            }
            PlanJobs::Workflow(dag) => {
                for origin in dag.origins() {
                    if origin.trigger_type != TriggerType::Schedule {
                        debug!("作业 {} 等待API触发", origin.id);
                        continue;
                    }
                    let (_, event) = self
                        .create_job_instance(&instance, origin, trigger_at, 0, pending)
                        .await?;
                    events.extend(event);
                }
            }
        }
        self.drain(info, events, pending).await?;
        Ok(instance)
    }

    /// 创建作业实例及首批任务；任务创建失败时作业实例直接失败并返回对应事件
    async fn create_job_instance(
        &self,
        plan_instance: &PlanInstance,
        job: &JobInfo,
        trigger_at: DateTime<Utc>,
        retry_times: u32,
        pending: &mut Pending,
    ) -> SchedulerResult<(JobInstance, Option<JobEvent>)> {
        let attributes = merged(&[&plan_instance.context, &job.attributes]);
        let mut instance = JobInstance::from_job(
            generate_id("job_instance"),
            plan_instance,
            job,
            attributes,
            trigger_at,
        );
        instance.retry_times = retry_times;
        self.repositories.job_instances.save(&instance).await?;
        debug!(
            "创建作业实例 {} (作业 {} 第 {} 次重试)",
            instance.job_instance_id, job.id, retry_times
        );

        let event = self.create_initial_tasks(&instance, pending).await?;
        Ok((instance, event))
    }

    async fn create_initial_tasks(
        &self,
        instance: &JobInstance,
        pending: &mut Pending,
    ) -> SchedulerResult<Option<JobEvent>> {
        let task_type = TaskFactory::initial_task_type(instance.job_type);
        let mut context = TaskCreateContext::default();
        if task_type == TaskType::Broadcast {
            context.workers = self
                .workers
                .available_workers()
                .await?
                .into_iter()
                .filter(|w| w.has_executor(&instance.executor_name))
                .collect();
        }

        match self.factory.create(task_type, instance, &context) {
            Ok(tasks) => {
                self.save_tasks(tasks, pending).await?;
                Ok(None)
            }
            Err(e) => {
                warn!("作业实例 {} 创建任务失败: {}", instance.job_instance_id, e);
                self.fail_job(instance, &e.to_string()).await
            }
        }
    }

    async fn save_tasks(&self, tasks: Vec<Task>, pending: &mut Pending) -> SchedulerResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        self.repositories.tasks.save_all(&tasks).await?;
        pending.extend(tasks);
        Ok(())
    }

    /// API触发工作流节点：节点须为API触发、前驱均已结束且本次触发中尚未调度过
    pub async fn api_schedule_job(
        self: &Arc<Self>,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<JobInstance> {
        self.schedule_job_node(plan_instance_id, job_id, false).await
    }

    /// 手动重跑工作流节点，不检查触发方式与已有实例
    pub async fn manual_schedule_job(
        self: &Arc<Self>,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<JobInstance> {
        self.schedule_job_node(plan_instance_id, job_id, true).await
    }

    async fn schedule_job_node(
        self: &Arc<Self>,
        plan_instance_id: &str,
        job_id: &str,
        manual: bool,
    ) -> SchedulerResult<JobInstance> {
        let plan_id = self.plan_instance(plan_instance_id).await?.plan_id;

        let mut pending = Pending::new();
        let instance = {
            let _guard = self.plan_locks.lock(&plan_id).await;
            let plan_instance = self.plan_instance(plan_instance_id).await?;
            if plan_instance.is_completed() {
                return Err(SchedulerError::PreconditionNotMet(format!(
                    "计划实例 {plan_instance_id} 已结束"
                )));
            }

            let info = self.plan_info(&plan_instance).await?;
            let dag = info.dag().ok_or_else(|| {
                SchedulerError::Validation(format!(
                    "计划实例 {plan_instance_id} 不是工作流，不能单独调度作业"
                ))
            })?;
            let job = dag.node(job_id).ok_or_else(|| {
                SchedulerError::Validation(format!("工作流中不存在作业 {job_id}"))
            })?;

            if !manual && job.trigger_type != TriggerType::Api {
                return Err(SchedulerError::PreconditionNotMet(format!(
                    "作业 {job_id} 不是API触发"
                )));
            }
            for predecessor in dag.predecessors(job_id) {
                let passed = self
                    .latest_job_instance(plan_instance_id, &predecessor.id)
                    .await?
                    .is_some_and(|i| i.is_success_or_ignorable());
                if !passed {
                    return Err(SchedulerError::PreconditionNotMet(format!(
                        "作业 {job_id} 的前置作业 {} 尚未完成",
                        predecessor.id
                    )));
                }
            }
            if !manual
                && self
                    .latest_job_instance(plan_instance_id, job_id)
                    .await?
                    .is_some()
            {
                return Err(SchedulerError::PreconditionNotMet(format!(
                    "作业 {job_id} 在计划实例 {plan_instance_id} 中已调度"
                )));
            }

            let (instance, event) = self
                .create_job_instance(&plan_instance, job, Utc::now(), 0, &mut pending)
                .await?;
            self.drain(&info, event.into_iter().collect(), &mut pending)
                .await?;
            info!(
                "{}调度作业 {} → 作业实例 {}",
                if manual { "手动" } else { "API" },
                job_id,
                instance.job_instance_id
            );
            instance
        };

        self.launch(pending).await;
        Ok(instance)
    }

    /// 下发任务
    ///
    /// 下发前若所属计划实例已结束、或同一计划实例中有要求终止的作业已失败，则直接失败。
    pub async fn schedule_task(self: &Arc<Self>, task_id: &str) -> SchedulerResult<()> {
        let Some(task) = self.repositories.tasks.get(task_id).await? else {
            warn!("任务 {} 不存在，跳过下发", task_id);
            return Ok(());
        };

        {
            let guard = self.plan_locks.lock(&task.plan_id).await;
            let Some(task) = self.repositories.tasks.get(task_id).await? else {
                return Ok(());
            };
            if task.status != TaskStatus::Scheduling {
                debug!("任务 {} 状态为 {:?}，跳过下发", task_id, task.status);
                return Ok(());
            }

            let plan_instance = self.plan_instance(&task.plan_instance_id).await?;
            if let Some(reason) = self.fail_fast_reason(&plan_instance, &task).await? {
                info!("任务 {} 不再下发: {}", task_id, reason);
                let mut pending = Pending::new();
                self.fail_task_locked(&task, &reason, None, &mut pending)
                    .await?;
                drop(guard);
                self.launch(pending).await;
                return Ok(());
            }

            if !self.repositories.tasks.dispatching(task_id).await? {
                return Ok(());
            }
            let now = Utc::now();
            self.repositories
                .job_instances
                .execute(&task.job_instance_id, now)
                .await?;
            self.repositories
                .plan_instances
                .execute(&task.plan_instance_id, now)
                .await?;
        }

        match self.dispatcher.dispatch(&task).await {
            Ok(DispatchOutcome::Dispatched { worker_id }) => {
                if !self
                    .repositories
                    .tasks
                    .executing(task_id, &worker_id, Utc::now())
                    .await?
                {
                    debug!("任务 {} 已不在下发中，可能已收到反馈", task_id);
                }
                Ok(())
            }
            Ok(DispatchOutcome::Exhausted { attempts }) => {
                self.handle_fail(&TaskFeedback::failed(
                    task_id,
                    &format!("下发失败，已尝试 {attempts} 次"),
                ))
                .await
            }
            Err(e) => {
                self.handle_fail(&TaskFeedback::failed(task_id, &e.to_string()))
                    .await
            }
        }
    }

    async fn fail_fast_reason(
        &self,
        plan_instance: &PlanInstance,
        task: &Task,
    ) -> SchedulerResult<Option<String>> {
        if plan_instance.is_completed() {
            return Ok(Some(format!(
                "计划实例 {} 已结束",
                plan_instance.plan_instance_id
            )));
        }
        let latest = self
            .latest_job_instances(&plan_instance.plan_instance_id)
            .await?;
        Ok(latest
            .values()
            .find(|i| {
                i.job_id != task.job_id
                    && i.status == JobStatus::Failed
                    && i.terminate_with_fail
            })
            .map(|i| format!("作业 {} 已失败", i.job_id)))
    }

    /// 任务成功反馈
    ///
    /// 同类任务全部成功时推进作业：SPLIT → MAP → REDUCE，最后一步成功即作业成功。
    pub async fn handle_success(self: &Arc<Self>, feedback: &TaskFeedback) -> SchedulerResult<()> {
        let task = self.task(&feedback.task_id).await?;

        let mut pending = Pending::new();
        {
            let _guard = self.plan_locks.lock(&task.plan_id).await;
            let result = match task.task_type {
                TaskType::Split => Some(serde_json::to_value(&feedback.map_task_attributes)?),
                _ if feedback.result_attributes.is_empty() => None,
                _ => Some(Value::Object(feedback.result_attributes.clone())),
            };
            if !self
                .repositories
                .tasks
                .success(&task.task_id, Utc::now(), &feedback.context, result)
                .await?
            {
                debug!("任务 {} 已结束，忽略重复的成功反馈", task.task_id);
                return Ok(());
            }
            debug!("任务 {} 执行成功", task.task_id);

            let instance = self.job_instance(&task.job_instance_id).await?;
            if instance.status != JobStatus::Executing {
                debug!(
                    "作业实例 {} 状态为 {:?}，不再推进",
                    instance.job_instance_id, instance.status
                );
                return Ok(());
            }

            let tasks = self
                .repositories
                .tasks
                .find_by_job_instance(&instance.job_instance_id)
                .await?;
            let same_type: Vec<&Task> = tasks
                .iter()
                .filter(|t| t.task_type == task.task_type)
                .collect();
            if same_type.iter().any(|t| t.status != TaskStatus::Succeed) {
                return Ok(());
            }

            let event = self
                .advance_job(&instance, task.task_type, &tasks, &mut pending)
                .await?;
            let plan_instance = self.plan_instance(&instance.plan_instance_id).await?;
            let info = self.plan_info(&plan_instance).await?;
            self.drain(&info, event.into_iter().collect(), &mut pending)
                .await?;
        }

        self.launch(pending).await;
        Ok(())
    }

    /// 某一类任务全部成功后推进作业实例
    async fn advance_job(
        &self,
        instance: &JobInstance,
        finished: TaskType,
        tasks: &[Task],
        pending: &mut Pending,
    ) -> SchedulerResult<Option<JobEvent>> {
        let results = |task_type: TaskType| -> Vec<Attributes> {
            tasks
                .iter()
                .filter(|t| t.task_type == task_type)
                .flat_map(|t| attributes_list(t.result.as_ref()))
                .collect()
        };

        let next = match finished {
            TaskType::Split => {
                let map_attributes = results(TaskType::Split);
                if !map_attributes.is_empty() {
                    Some((
                        TaskType::Map,
                        TaskCreateContext {
                            map_attributes,
                            ..Default::default()
                        },
                    ))
                } else if instance.job_type == JobType::MapReduce {
                    Some((TaskType::Reduce, TaskCreateContext::default()))
                } else {
                    None
                }
            }
            TaskType::Map if instance.job_type == JobType::MapReduce => Some((
                TaskType::Reduce,
                TaskCreateContext {
                    reduce_attributes: results(TaskType::Map),
                    ..Default::default()
                },
            )),
            _ => None,
        };

        match next {
            Some((task_type, context)) => {
                debug!(
                    "作业实例 {} 进入 {:?} 阶段",
                    instance.job_instance_id, task_type
                );
                let created = self.factory.create(task_type, instance, &context)?;
                self.save_tasks(created, pending).await?;
                Ok(None)
            }
            None => self.succeed_job(instance, tasks).await,
        }
    }

    async fn succeed_job(
        &self,
        instance: &JobInstance,
        tasks: &[Task],
    ) -> SchedulerResult<Option<JobEvent>> {
        let mut context = instance.context.clone();
        for task in tasks {
            merge_attributes(&mut context, &task.context);
        }
        if !self
            .repositories
            .job_instances
            .success(&instance.job_instance_id, Utc::now(), &context)
            .await?
        {
            return Ok(None);
        }
        self.repositories
            .plan_instances
            .merge_context(&instance.plan_instance_id, &context)
            .await?;
        info!("作业实例 {} 执行成功", instance.job_instance_id);

        let mut succeeded = instance.clone();
        succeeded.status = JobStatus::Succeed;
        succeeded.context = context;
        Ok(Some(JobEvent::Passed(succeeded)))
    }

    /// 任务失败反馈，作业实例随之失败
    pub async fn handle_fail(self: &Arc<Self>, feedback: &TaskFeedback) -> SchedulerResult<()> {
        let task = self.task(&feedback.task_id).await?;
        let error_msg = feedback.error_msg.as_deref().unwrap_or("任务执行失败");

        let mut pending = Pending::new();
        {
            let _guard = self.plan_locks.lock(&task.plan_id).await;
            self.fail_task_locked(
                &task,
                error_msg,
                feedback.error_stack_trace.as_deref(),
                &mut pending,
            )
            .await?;
        }
        self.launch(pending).await;
        Ok(())
    }

    async fn fail_task_locked(
        &self,
        task: &Task,
        error_msg: &str,
        error_stack_trace: Option<&str>,
        pending: &mut Pending,
    ) -> SchedulerResult<()> {
        if !self
            .repositories
            .tasks
            .fail(&task.task_id, Utc::now(), error_msg, error_stack_trace)
            .await?
        {
            debug!("任务 {} 已结束，忽略重复的失败反馈", task.task_id);
            return Ok(());
        }
        warn!("任务 {} 执行失败: {}", task.task_id, error_msg);

        let instance = self.job_instance(&task.job_instance_id).await?;
        if instance.status.is_completed() {
            return Ok(());
        }
        let event = self.fail_job(&instance, error_msg).await?;
        let plan_instance = self.plan_instance(&instance.plan_instance_id).await?;
        let info = self.plan_info(&plan_instance).await?;
        self.drain(&info, event.into_iter().collect(), pending).await
    }

    async fn fail_job(
        &self,
        instance: &JobInstance,
        error_msg: &str,
    ) -> SchedulerResult<Option<JobEvent>> {
        if !self
            .repositories
            .job_instances
            .fail(&instance.job_instance_id, Utc::now(), error_msg)
            .await?
        {
            return Ok(None);
        }
        warn!("作业实例 {} 执行失败: {}", instance.job_instance_id, error_msg);

        let mut failed = instance.clone();
        failed.status = JobStatus::Failed;
        failed.error_msg = Some(error_msg.to_string());
        Ok(Some(if failed.terminate_with_fail {
            JobEvent::Failed(failed)
        } else {
            JobEvent::Passed(failed)
        }))
    }

    /// 逐个处理作业结束事件，处理过程中产生的新事件追加到队尾
    async fn drain(
        &self,
        info: &PlanInfo,
        mut events: VecDeque<JobEvent>,
        pending: &mut Pending,
    ) -> SchedulerResult<()> {
        while let Some(event) = events.pop_front() {
            let instance = match &event {
                JobEvent::Passed(i) | JobEvent::Failed(i) => i,
            };
            let plan_instance = self.plan_instance(&instance.plan_instance_id).await?;
            if plan_instance.is_completed() {
                continue;
            }
            match event {
                JobEvent::Passed(instance) => {
                    self.on_job_passed(info, &plan_instance, &instance, &mut events, pending)
                        .await?
                }
                JobEvent::Failed(instance) => {
                    self.on_job_failed(info, &plan_instance, &instance, &mut events, pending)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn on_job_passed(
        &self,
        info: &PlanInfo,
        plan_instance: &PlanInstance,
        instance: &JobInstance,
        events: &mut VecDeque<JobEvent>,
        pending: &mut Pending,
    ) -> SchedulerResult<()> {
        let dag = match &info.jobs {
            PlanJobs::Single(_) => {
                return self
                    .complete_plan(plan_instance, PlanStatus::Succeed)
                    .await;
            }
            PlanJobs::Workflow(dag) => dag,
        };

        let latest = self
            .latest_job_instances(&plan_instance.plan_instance_id)
            .await?;
        let passed = |job_id: &str| {
            latest
                .get(job_id)
                .is_some_and(|i| i.is_success_or_ignorable())
        };

        if dag.is_leaf(&instance.job_id) {
            if dag.leaves().iter().all(|leaf| passed(&leaf.id)) {
                return self
                    .complete_plan(plan_instance, PlanStatus::Succeed)
                    .await;
            }
            return Ok(());
        }

        for successor in dag.successors(&instance.job_id) {
            if successor.trigger_type == TriggerType::Api {
                debug!("作业 {} 等待API触发", successor.id);
                continue;
            }
            if latest.contains_key(&successor.id) {
                continue;
            }
            if !dag.predecessors(&successor.id).iter().all(|p| passed(&p.id)) {
                continue;
            }
            let (_, event) = self
                .create_job_instance(plan_instance, successor, Utc::now(), 0, pending)
                .await?;
            events.extend(event);
        }
        Ok(())
    }

    async fn on_job_failed(
        &self,
        info: &PlanInfo,
        plan_instance: &PlanInstance,
        instance: &JobInstance,
        events: &mut VecDeque<JobEvent>,
        pending: &mut Pending,
    ) -> SchedulerResult<()> {
        if !instance.can_retry() {
            return self.complete_plan(plan_instance, PlanStatus::Failed).await;
        }

        let Some(job) = info.job(&instance.job_id) else {
            error!("计划 {} 中不存在作业 {}", info.plan_id, instance.job_id);
            return self.complete_plan(plan_instance, PlanStatus::Failed).await;
        };
        let interval = Duration::seconds(instance.retry_option.retry_interval_seconds as i64);
        let retry_times = instance.retry_times + 1;
        info!(
            "作业 {} 第 {}/{} 次重试，{} 秒后执行",
            job.id,
            retry_times,
            instance.retry_option.retry,
            interval.num_seconds()
        );
        let (_, event) = self
            .create_job_instance(
                plan_instance,
                job,
                Utc::now() + interval,
                retry_times,
                pending,
            )
            .await?;
        events.extend(event);
        Ok(())
    }

    async fn complete_plan(
        &self,
        plan_instance: &PlanInstance,
        status: PlanStatus,
    ) -> SchedulerResult<()> {
        let feedback_at = Utc::now();
        if !self
            .repositories
            .plan_instances
            .complete(&plan_instance.plan_instance_id, status, feedback_at)
            .await?
        {
            return Ok(());
        }
        info!(
            "计划实例 {} 结束，状态 {:?}",
            plan_instance.plan_instance_id, status
        );
        let label = if status == PlanStatus::Succeed { "succeed" } else { "failed" };
        counter!("scheduler_plan_instance_completed_total", "status" => label).increment(1);

        if plan_instance.schedule_type == ScheduleType::FixedDelay
            && plan_instance.trigger_type == TriggerType::Schedule
        {
            let schedule_id = MetaTaskType::PlanSchedule.schedule_id(&plan_instance.plan_id);
            if !self.meta_scheduler.feedback(&schedule_id, feedback_at).await {
                debug!("元任务 {} 未接收反馈", schedule_id);
            }
        }
        Ok(())
    }

    /// 对账：重新下发停留在 SCHEDULING 的作业实例
    ///
    /// 没有任务时重新创建，否则把下发中的任务退回 SCHEDULING 后重新投递未结束的任务。
    pub async fn reschedule_job_instance(self: &Arc<Self>, instance: &JobInstance) -> SchedulerResult<()> {
        let mut pending = Pending::new();
        {
            let _guard = self.plan_locks.lock(&instance.plan_id).await;
            let instance = self.job_instance(&instance.job_instance_id).await?;
            if instance.status != JobStatus::Scheduling {
                return Ok(());
            }
            let plan_instance = self.plan_instance(&instance.plan_instance_id).await?;
            if plan_instance.is_completed() {
                debug!(
                    "作业实例 {} 所属计划实例已结束，跳过对账",
                    instance.job_instance_id
                );
                return Ok(());
            }

            let tasks = self
                .repositories
                .tasks
                .find_by_job_instance(&instance.job_instance_id)
                .await?;
            if tasks.is_empty() {
                info!("作业实例 {} 没有任务，重新创建", instance.job_instance_id);
                let event = self.create_initial_tasks(&instance, &mut pending).await?;
                let info = self.plan_info(&plan_instance).await?;
                self.drain(&info, event.into_iter().collect(), &mut pending)
                    .await?;
            } else {
                for mut task in tasks {
                    if task.status == TaskStatus::Dispatching
                        && self.repositories.tasks.reset_dispatching(&task.task_id).await?
                    {
                        task.status = TaskStatus::Scheduling;
                    }
                    if task.status == TaskStatus::Scheduling {
                        pending.push(task);
                    }
                }
                info!(
                    "作业实例 {} 重新下发 {} 个任务",
                    instance.job_instance_id,
                    pending.len()
                );
            }
        }
        self.launch(pending).await;
        Ok(())
    }

    /// 为新任务布置下发元任务
    async fn launch(self: &Arc<Self>, tasks: Pending) {
        let arming = tasks.iter().map(|task| async move {
            let meta = Arc::new(TaskScheduleTask::new(Arc::clone(self), task));
            if !self.meta_scheduler.schedule(meta).await {
                debug!("任务 {} 的下发元任务未布置", task.task_id);
            }
        });
        join_all(arming).await;
    }

    async fn task(&self, task_id: &str) -> SchedulerResult<Task> {
        self.repositories
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    async fn job_instance(&self, job_instance_id: &str) -> SchedulerResult<JobInstance> {
        self.repositories
            .job_instances
            .get(job_instance_id)
            .await?
            .ok_or_else(|| SchedulerError::JobInstanceNotFound {
                id: job_instance_id.to_string(),
            })
    }

    async fn plan_instance(&self, plan_instance_id: &str) -> SchedulerResult<PlanInstance> {
        self.repositories
            .plan_instances
            .get(plan_instance_id)
            .await?
            .ok_or_else(|| SchedulerError::PlanInstanceNotFound {
                id: plan_instance_id.to_string(),
            })
    }

    async fn plan_info(&self, plan_instance: &PlanInstance) -> SchedulerResult<PlanInfo> {
        self.repositories
            .plans
            .get_info(&plan_instance.plan_id, &plan_instance.version)
            .await?
            .ok_or_else(|| SchedulerError::PlanNotFound {
                id: format!("{}@{}", plan_instance.plan_id, plan_instance.version),
            })
    }

    async fn latest_job_instance(
        &self,
        plan_instance_id: &str,
        job_id: &str,
    ) -> SchedulerResult<Option<JobInstance>> {
        Ok(self
            .repositories
            .job_instances
            .find_by_plan_instance_and_job(plan_instance_id, job_id)
            .await?
            .pop())
    }

    /// 每个作业最近一次的实例，重试产生的新实例覆盖旧实例
    async fn latest_job_instances(
        &self,
        plan_instance_id: &str,
    ) -> SchedulerResult<HashMap<String, JobInstance>> {
        let instances = self
            .repositories
            .job_instances
            .find_by_plan_instance(plan_instance_id)
            .await?;
        Ok(instances
            .into_iter()
            .map(|i| (i.job_id.clone(), i))
            .collect())
    }
}

/// 任务结果中的属性列表，SPLIT 结果为数组，MAP 结果为单个对象
fn attributes_list(value: Option<&Value>) -> Vec<Attributes> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        Some(Value::Object(map)) => vec![map.clone()],
        _ => Vec::new(),
    }
}
