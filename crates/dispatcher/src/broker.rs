//! 调度节点装配
//!
//! 把仓储、注册中心与RPC装配成一个完整的调度节点，启动后布置计划加载、作业对账、
//! Worker心跳检查与执行中任务检查四个循环元任务。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use scheduler_core::{
    AppConfig, BrokerNode, NodeRegistry, SchedulerResult, WorkerRegistry, WorkerRpc,
    WorkerStatisticsRepository,
};

use crate::cluster::{NodeManager, SlotManager};
use crate::meta_task::{
    JobScheduleCheckTask, LoopMetaTask, MetaTaskScheduler, PlanLoadTask, TaskExecuteCheckTask,
    WorkerStatusCheckTask,
};
use crate::plan_service::PlanService;
use crate::processor::SchedulerProcessor;
use crate::strategies::WorkerSelectorFactory;
use crate::strategy::{Repositories, ScheduleStrategy};
use crate::task_dispatcher::TaskDispatcher;

/// 调度节点的外部协作方
#[derive(Clone)]
pub struct BrokerDependencies {
    pub repositories: Repositories,
    pub workers: Arc<dyn WorkerRegistry>,
    pub statistics: Arc<dyn WorkerStatisticsRepository>,
    pub rpc: Arc<dyn WorkerRpc>,
    pub node_registry: Arc<dyn NodeRegistry>,
}

pub struct Broker {
    config: AppConfig,
    nodes: Arc<NodeManager>,
    meta_scheduler: MetaTaskScheduler,
    strategy: Arc<ScheduleStrategy>,
    processor: SchedulerProcessor,
    plan_service: PlanService,
    plan_loader: Arc<PlanLoadTask>,
    job_checker: Arc<JobScheduleCheckTask>,
    worker_checker: Arc<WorkerStatusCheckTask>,
    task_checker: Arc<TaskExecuteCheckTask>,
}

impl Broker {
    pub fn new(config: AppConfig, deps: BrokerDependencies) -> Self {
        let local = BrokerNode::new(&config.broker.node_id, &config.broker.host, config.broker.port);
        let slots = Arc::new(SlotManager::new(local.clone(), config.broker.slot_size));
        let nodes = Arc::new(NodeManager::new(
            local,
            deps.node_registry,
            Arc::clone(&slots),
        ));
        let meta_scheduler = MetaTaskScheduler::new(config.meta_task.max_concurrent_executions);

        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::clone(&deps.workers),
            deps.statistics,
            deps.rpc,
            WorkerSelectorFactory::default(),
            config.dispatcher.clone(),
        ));
        let worker_checker = Arc::new(WorkerStatusCheckTask::new(
            Arc::clone(&deps.workers),
            Arc::clone(&nodes),
            config.meta_task.worker_check_interval_seconds,
            config.broker.worker_heartbeat_timeout_seconds,
        ));
        let strategy = Arc::new(ScheduleStrategy::new(
            deps.repositories.clone(),
            deps.workers,
            slots,
            dispatcher,
            meta_scheduler.clone(),
            config.dispatcher.max_concurrent_dispatches,
        ));

        let plan_loader = Arc::new(PlanLoadTask::new(
            Arc::clone(&strategy),
            Arc::clone(&nodes),
            config.meta_task.plan_load_interval_seconds,
        ));
        let job_checker = Arc::new(JobScheduleCheckTask::new(
            Arc::clone(&strategy),
            Arc::clone(&nodes),
            &config.meta_task,
        ));
        let task_checker = Arc::new(TaskExecuteCheckTask::new(
            Arc::clone(&strategy),
            Arc::clone(&nodes),
            &config.meta_task,
        ));

        Self {
            processor: SchedulerProcessor::new(Arc::clone(&strategy)),
            plan_service: PlanService::new(deps.repositories.plans, config.broker.slot_size),
            config,
            nodes,
            meta_scheduler,
            strategy,
            plan_loader,
            job_checker,
            worker_checker,
            task_checker,
        }
    }

    /// 节点上线并布置各循环元任务
    pub async fn start(&self) -> SchedulerResult<()> {
        self.nodes.start().await?;
        self.meta_scheduler
            .schedule(LoopMetaTask::new(self.worker_checker.clone()))
            .await;
        self.meta_scheduler
            .schedule(LoopMetaTask::new(self.plan_loader.clone()))
            .await;
        self.meta_scheduler
            .schedule(LoopMetaTask::new(self.job_checker.clone()))
            .await;
        self.meta_scheduler
            .schedule(LoopMetaTask::new(self.task_checker.clone()))
            .await;
        info!(
            "调度节点 {} 已启动，持有 {} 个槽位",
            self.config.broker.node_id,
            self.strategy.slots().owned_slots().len()
        );
        Ok(())
    }

    /// 停止元任务调度并下线，等待执行中的元任务与下发结束
    pub async fn shutdown(&self, timeout: Duration) -> SchedulerResult<()> {
        let drain = async {
            self.meta_scheduler.shutdown().await;
            self.strategy.drain_dispatches().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("等待元任务与下发结束超时 ({:?})", timeout);
        }
        self.nodes.stop().await?;
        info!("调度节点 {} 已停止", self.config.broker.node_id);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn processor(&self) -> &SchedulerProcessor {
        &self.processor
    }

    pub fn plan_service(&self) -> &PlanService {
        &self.plan_service
    }

    pub fn strategy(&self) -> &Arc<ScheduleStrategy> {
        &self.strategy
    }

    pub fn nodes(&self) -> &Arc<NodeManager> {
        &self.nodes
    }

    pub fn meta_scheduler(&self) -> &MetaTaskScheduler {
        &self.meta_scheduler
    }

    pub fn plan_loader(&self) -> &Arc<PlanLoadTask> {
        &self.plan_loader
    }

    pub fn job_checker(&self) -> &Arc<JobScheduleCheckTask> {
        &self.job_checker
    }

    pub fn worker_checker(&self) -> &Arc<WorkerStatusCheckTask> {
        &self.worker_checker
    }

    pub fn task_checker(&self) -> &Arc<TaskExecuteCheckTask> {
        &self.task_checker
    }
}
