//! 测试数据构建器，提供合理默认值并支持链式定制

use chrono::{DateTime, Utc};
use scheduler_core::{
    Attributes, Dag, DispatchOption, JobInfo, JobType, LoadBalanceType, PlanInfo, PlanJobs,
    RetryOption, ScheduleOption, TagFilter, TriggerType, Worker, WorkerExecutor, WorkerMetric,
    WorkerStatus,
};

/// 作业定义构建器
pub struct JobInfoBuilder {
    job: JobInfo,
}

impl JobInfoBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            job: JobInfo::new(id, JobType::Normal, "echo"),
        }
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job.job_type = job_type;
        self
    }

    pub fn with_executor(mut self, executor_name: &str) -> Self {
        self.job.executor_name = executor_name.to_string();
        self
    }

    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.job.children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.job.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.job.trigger_type = trigger_type;
        self
    }

    pub fn api_triggered(self) -> Self {
        self.with_trigger_type(TriggerType::Api)
    }

    pub fn terminate_with_fail(mut self, terminate: bool) -> Self {
        self.job.terminate_with_fail = terminate;
        self
    }

    pub fn with_retry(mut self, retry: u32, retry_interval_seconds: u64) -> Self {
        self.job.retry_option = RetryOption {
            retry,
            retry_interval_seconds,
        };
        self
    }

    pub fn with_load_balance(mut self, load_balance_type: LoadBalanceType) -> Self {
        self.job.dispatch_option.load_balance_type = load_balance_type;
        self
    }

    pub fn with_dispatch_option(mut self, dispatch_option: DispatchOption) -> Self {
        self.job.dispatch_option = dispatch_option;
        self
    }

    pub fn with_tag_filter(mut self, name: &str, values: &[&str]) -> Self {
        self.job.dispatch_option.tag_filters.push(TagFilter {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> JobInfo {
        self.job
    }
}

/// 计划版本快照构建器，默认是一个 FIXED_RATE 60s 的 SINGLE 计划
pub struct PlanInfoBuilder {
    plan_id: String,
    version: String,
    name: String,
    trigger_type: TriggerType,
    schedule_option: ScheduleOption,
    jobs: Vec<JobInfo>,
    workflow: bool,
    created_at: DateTime<Utc>,
}

impl PlanInfoBuilder {
    pub fn new(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            version: "v1".to_string(),
            name: plan_id.to_string(),
            trigger_type: TriggerType::Schedule,
            schedule_option: ScheduleOption::fixed_rate(60),
            jobs: Vec::new(),
            workflow: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    pub fn with_schedule(mut self, schedule_option: ScheduleOption) -> Self {
        self.schedule_option = schedule_option;
        self
    }

    /// SINGLE 计划的唯一作业
    pub fn single(mut self, job: JobInfo) -> Self {
        self.jobs = vec![job];
        self.workflow = false;
        self
    }

    /// WORKFLOW 计划的全部节点
    pub fn workflow(mut self, jobs: Vec<JobInfo>) -> Self {
        self.jobs = jobs;
        self.workflow = true;
        self
    }

    /// 构建快照，工作流节点非法时 panic，仅用于测试
    pub fn build(self) -> PlanInfo {
        let mut jobs = self.jobs;
        let plan_jobs = if self.workflow {
            PlanJobs::Workflow(Dag::build(jobs).expect("测试工作流DAG非法"))
        } else {
            PlanJobs::Single(
                jobs.pop()
                    .unwrap_or_else(|| JobInfoBuilder::new("job").build()),
            )
        };
        PlanInfo {
            plan_id: self.plan_id,
            version: self.version,
            name: self.name,
            trigger_type: self.trigger_type,
            schedule_option: self.schedule_option,
            jobs: plan_jobs,
            created_at: self.created_at,
        }
    }
}

/// Worker快照构建器，默认支持 `echo` 执行器
pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new(worker_id: &str) -> Self {
        let mut worker = Worker::new(worker_id, "127.0.0.1", 8080);
        worker.executors.push(WorkerExecutor {
            name: "echo".to_string(),
            description: String::new(),
        });
        Self { worker }
    }

    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.worker.host = host.to_string();
        self.worker.port = port;
        self
    }

    pub fn with_executor(mut self, name: &str) -> Self {
        self.worker.executors.push(WorkerExecutor {
            name: name.to_string(),
            description: String::new(),
        });
        self
    }

    pub fn with_tag(mut self, name: &str, values: &[&str]) -> Self {
        self.worker.tags.insert(
            name.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.worker.status = status;
        self
    }

    pub fn with_metric(mut self, metric: WorkerMetric) -> Self {
        self.worker.metric = metric;
        self
    }

    pub fn with_last_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.worker.metric.last_heartbeat_at = at;
        self
    }

    /// 资源耗尽的Worker
    pub fn exhausted(mut self) -> Self {
        self.worker.metric.available_queue_limit = 0;
        self
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}

/// 生成 `worker-1..=worker-n`，端口依次递增
pub fn workers(count: usize) -> Vec<Worker> {
    (1..=count)
        .map(|i| {
            WorkerBuilder::new(&format!("worker-{i}"))
                .with_address("127.0.0.1", 8080 + i as u16)
                .build()
        })
        .collect()
}

/// 由键值对构造属性表
pub fn attributes(pairs: &[(&str, serde_json::Value)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
