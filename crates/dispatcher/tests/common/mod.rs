//! 集成测试共用的单节点环境：内存仓储 + 可编排的Worker RPC

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use scheduler_core::*;
use scheduler_dispatcher::{Broker, BrokerDependencies, Repositories};
use scheduler_infrastructure::*;
use scheduler_testing_utils::{MockWorkerRpc, TestEnv};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub broker: Broker,
    pub plans: InMemoryPlanRepository,
    pub plan_instances: InMemoryPlanInstanceRepository,
    pub job_instances: InMemoryJobInstanceRepository,
    pub tasks: InMemoryTaskRepository,
    pub workers: InMemoryWorkerRegistry,
    pub statistics: InMemoryWorkerStatistics,
    pub node_registry: InMemoryNodeRegistry,
    pub rpc: MockWorkerRpc,
}

impl Harness {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self::with_config(test_config(), workers)
    }

    pub fn with_config(config: AppConfig, workers: Vec<Worker>) -> Self {
        let plans = InMemoryPlanRepository::new();
        let plan_instances = InMemoryPlanInstanceRepository::new();
        let job_instances = InMemoryJobInstanceRepository::new();
        let tasks = InMemoryTaskRepository::new();
        let worker_registry = InMemoryWorkerRegistry::with_workers(workers);
        let statistics = InMemoryWorkerStatistics::new();
        let node_registry = InMemoryNodeRegistry::new();
        let rpc = MockWorkerRpc::new();

        let deps = BrokerDependencies {
            repositories: Repositories {
                plans: Arc::new(plans.clone()),
                plan_instances: Arc::new(plan_instances.clone()),
                job_instances: Arc::new(job_instances.clone()),
                tasks: Arc::new(tasks.clone()),
            },
            workers: Arc::new(worker_registry.clone()),
            statistics: Arc::new(statistics.clone()),
            rpc: Arc::new(rpc.clone()),
            node_registry: Arc::new(node_registry.clone()),
        };

        Self {
            broker: Broker::new(config, deps),
            plans,
            plan_instances,
            job_instances,
            tasks,
            workers: worker_registry,
            statistics,
            node_registry,
            rpc,
        }
    }

    /// 只让节点上线并分配槽位，不布置计划加载与对账
    pub async fn online(workers: Vec<Worker>) -> Self {
        let harness = Self::new(workers);
        harness.broker.nodes().start().await.unwrap();
        harness
    }

    pub async fn save(&self, info: &PlanInfo) -> Plan {
        self.broker.plan_service().save(info).await.unwrap()
    }

    /// API方式触发计划
    pub async fn trigger(&self, plan_id: &str) -> PlanInstance {
        self.broker
            .processor()
            .schedule(plan_id, TriggerType::Api, Attributes::new(), Utc::now())
            .await
            .unwrap()
            .expect("计划未触发")
    }

    pub async fn plan_instance(&self, plan_instance_id: &str) -> PlanInstance {
        self.plan_instances
            .get(plan_instance_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn job_instances_of(&self, plan_instance_id: &str) -> Vec<JobInstance> {
        self.job_instances
            .find_by_plan_instance(plan_instance_id)
            .await
            .unwrap()
    }

    pub async fn job_instances_for(&self, plan_instance_id: &str, job_id: &str) -> Vec<JobInstance> {
        self.job_instances
            .find_by_plan_instance_and_job(plan_instance_id, job_id)
            .await
            .unwrap()
    }

    pub async fn tasks_of(&self, job_instance_id: &str) -> Vec<Task> {
        self.tasks
            .find_by_job_instance(job_instance_id)
            .await
            .unwrap()
    }

    /// 等待作业的最新实例出现，并且其任务中有 `count` 个处于 EXECUTING
    pub async fn wait_executing(&self, plan_instance_id: &str, job_id: &str, count: usize) -> Vec<Task> {
        let reached = TestEnv::wait_for(
            || async move {
                match self.job_instances_for(plan_instance_id, job_id).await.pop() {
                    Some(instance) => {
                        let tasks = self.tasks_of(&instance.job_instance_id).await;
                        tasks
                            .iter()
                            .filter(|t| t.status == TaskStatus::Executing)
                            .count()
                            == count
                    }
                    None => false,
                }
            },
            WAIT,
        )
        .await;
        assert!(reached, "作业 {job_id} 未达到 {count} 个执行中的任务");

        let instance = self
            .job_instances_for(plan_instance_id, job_id)
            .await
            .pop()
            .unwrap();
        self.tasks_of(&instance.job_instance_id)
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Executing)
            .collect()
    }

    pub async fn wait_plan_status(&self, plan_instance_id: &str, status: PlanStatus) -> bool {
        TestEnv::wait_for(
            || async move { self.plan_instance(plan_instance_id).await.status == status },
            WAIT,
        )
        .await
    }

    pub async fn succeed(&self, task_id: &str) {
        self.feedback(TaskFeedback::succeed(task_id)).await;
    }

    pub async fn fail(&self, task_id: &str) {
        self.feedback(TaskFeedback::failed(task_id, "boom")).await;
    }

    pub async fn feedback(&self, feedback: TaskFeedback) {
        self.broker.processor().task_feedback(feedback).await.unwrap();
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.broker.node_id = "broker-test".to_string();
    config
}
