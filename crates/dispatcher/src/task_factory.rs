//! 任务创建
//!
//! 每种任务类型对应一个创建函数，由任务类型查表分派。

use std::collections::HashMap;

use scheduler_core::utils::generate_id;
use scheduler_core::{
    Attributes, JobInstance, JobType, SchedulerError, SchedulerResult, Task, TaskType, Worker,
};

/// 创建任务所需的额外输入
#[derive(Debug, Clone, Default)]
pub struct TaskCreateContext {
    /// 广播任务的目标Worker
    pub workers: Vec<Worker>,
    /// SPLIT 任务拆分出的分片参数，每组一个 MAP 任务
    pub map_attributes: Vec<Attributes>,
    /// MAP 任务的结果，汇总到 REDUCE 任务
    pub reduce_attributes: Vec<Attributes>,
}

type TaskCreator = fn(&JobInstance, &TaskCreateContext) -> SchedulerResult<Vec<Task>>;

fn new_task(instance: &JobInstance, task_type: TaskType) -> Task {
    Task::for_job_instance(generate_id("task"), instance, task_type)
}

fn create_normal(instance: &JobInstance, _: &TaskCreateContext) -> SchedulerResult<Vec<Task>> {
    Ok(vec![new_task(instance, TaskType::Normal)])
}

fn create_broadcast(
    instance: &JobInstance,
    context: &TaskCreateContext,
) -> SchedulerResult<Vec<Task>> {
    if context.workers.is_empty() {
        return Err(SchedulerError::NoWorkerAvailable(format!(
            "广播作业实例 {} 没有可用Worker",
            instance.job_instance_id
        )));
    }
    Ok(context
        .workers
        .iter()
        .map(|worker| {
            let mut task = new_task(instance, TaskType::Broadcast);
            task.worker_id = Some(worker.worker_id.clone());
            task
        })
        .collect())
}

fn create_split(instance: &JobInstance, _: &TaskCreateContext) -> SchedulerResult<Vec<Task>> {
    Ok(vec![new_task(instance, TaskType::Split)])
}

fn create_map(instance: &JobInstance, context: &TaskCreateContext) -> SchedulerResult<Vec<Task>> {
    Ok(context
        .map_attributes
        .iter()
        .map(|attributes| {
            let mut task = new_task(instance, TaskType::Map);
            task.map_attributes = Some(attributes.clone());
            task
        })
        .collect())
}

fn create_reduce(
    instance: &JobInstance,
    context: &TaskCreateContext,
) -> SchedulerResult<Vec<Task>> {
    let mut task = new_task(instance, TaskType::Reduce);
    task.reduce_attributes = context.reduce_attributes.clone();
    Ok(vec![task])
}

pub struct TaskFactory {
    creators: HashMap<TaskType, TaskCreator>,
}

impl TaskFactory {
    pub fn new() -> Self {
        let creators: HashMap<TaskType, TaskCreator> = HashMap::from([
            (TaskType::Normal, create_normal as TaskCreator),
            (TaskType::Broadcast, create_broadcast as TaskCreator),
            (TaskType::Split, create_split as TaskCreator),
            (TaskType::Map, create_map as TaskCreator),
            (TaskType::Reduce, create_reduce as TaskCreator),
        ]);
        Self { creators }
    }

    /// 作业实例首批任务的类型
    pub fn initial_task_type(job_type: JobType) -> TaskType {
        match job_type {
            JobType::Normal => TaskType::Normal,
            JobType::Broadcast => TaskType::Broadcast,
            JobType::Map | JobType::MapReduce => TaskType::Split,
        }
    }

    pub fn create(
        &self,
        task_type: TaskType,
        instance: &JobInstance,
        context: &TaskCreateContext,
    ) -> SchedulerResult<Vec<Task>> {
        let creator = self.creators.get(&task_type).ok_or_else(|| {
            SchedulerError::Internal(format!("未注册的任务类型: {task_type:?}"))
        })?;
        creator(instance, context)
    }
}

impl Default for TaskFactory {
    fn default() -> Self {
        Self::new()
    }
}
