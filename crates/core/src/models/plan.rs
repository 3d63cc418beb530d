use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Attributes, ScheduleOption, TriggerType};
use crate::dag::{Dag, DagNode};
use crate::{SchedulerError, SchedulerResult};

/// 计划类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlanType {
    #[serde(rename = "SINGLE")]
    Single,
    #[serde(rename = "WORKFLOW")]
    Workflow,
}

/// 作业类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobType {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "BROADCAST")]
    Broadcast,
    #[serde(rename = "MAP")]
    Map,
    #[serde(rename = "MAP_REDUCE")]
    MapReduce,
}

/// 负载均衡类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum LoadBalanceType {
    #[default]
    #[serde(rename = "ROUND_ROBIN")]
    RoundRobin,
    #[serde(rename = "RANDOM")]
    Random,
    #[serde(rename = "WEIGHTED")]
    Weighted,
    #[serde(rename = "LEAST_RECENTLY_USED")]
    LeastRecentlyUsed,
    #[serde(rename = "CONSISTENT_HASH")]
    ConsistentHash,
    #[serde(rename = "APPOINT")]
    Appoint,
}

/// 标签过滤：Worker必须带有该标签，且值命中其一（values为空时只要求存在）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagFilter {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// 下发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DispatchOption {
    #[serde(default)]
    pub load_balance_type: LoadBalanceType,
    #[serde(default)]
    pub tag_filters: Vec<TagFilter>,
    /// APPOINT 策略指定的Worker ID
    pub appoint_worker_id: Option<String>,
    /// APPOINT 策略指定的Worker地址，格式 protocol://host:port
    pub appoint_worker_url: Option<String>,
}

/// 作业失败重试配置
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetryOption {
    /// 最大重试次数，不含首次执行
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub retry_interval_seconds: u64,
}

/// 作业定义，同时作为工作流DAG的节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub job_type: JobType,
    pub executor_name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub dispatch_option: DispatchOption,
    #[serde(default)]
    pub retry_option: RetryOption,
    /// 工作流节点的触发方式，SINGLE 计划忽略
    #[serde(default = "default_trigger_type")]
    pub trigger_type: TriggerType,
    /// 失败时是否终止下游
    #[serde(default = "default_terminate_with_fail")]
    pub terminate_with_fail: bool,
    #[serde(default)]
    pub children: Vec<String>,
}

fn default_trigger_type() -> TriggerType {
    TriggerType::Schedule
}

fn default_terminate_with_fail() -> bool {
    true
}

impl JobInfo {
    pub fn new(id: &str, job_type: JobType, executor_name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            job_type,
            executor_name: executor_name.to_string(),
            attributes: Attributes::new(),
            dispatch_option: DispatchOption::default(),
            retry_option: RetryOption::default(),
            trigger_type: TriggerType::Schedule,
            terminate_with_fail: true,
            children: Vec::new(),
        }
    }
}

impl DagNode for JobInfo {
    fn id(&self) -> &str {
        &self.id
    }

    fn children(&self) -> &[String] {
        &self.children
    }
}

/// 计划包含的作业
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "plan_type", content = "jobs")]
pub enum PlanJobs {
    #[serde(rename = "SINGLE")]
    Single(JobInfo),
    #[serde(rename = "WORKFLOW")]
    Workflow(Dag<JobInfo>),
}

/// 计划版本快照，创建后不可修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInfo {
    pub plan_id: String,
    pub version: String,
    pub name: String,
    pub trigger_type: TriggerType,
    pub schedule_option: ScheduleOption,
    pub jobs: PlanJobs,
    pub created_at: DateTime<Utc>,
}

impl PlanInfo {
    pub fn plan_type(&self) -> PlanType {
        match self.jobs {
            PlanJobs::Single(_) => PlanType::Single,
            PlanJobs::Workflow(_) => PlanType::Workflow,
        }
    }

    pub fn dag(&self) -> Option<&Dag<JobInfo>> {
        match &self.jobs {
            PlanJobs::Workflow(dag) => Some(dag),
            PlanJobs::Single(_) => None,
        }
    }

    /// 按ID查找作业，SINGLE 计划只有一个作业
    pub fn job(&self, job_id: &str) -> Option<&JobInfo> {
        match &self.jobs {
            PlanJobs::Single(job) if job.id == job_id => Some(job),
            PlanJobs::Single(_) => None,
            PlanJobs::Workflow(dag) => dag.node(job_id),
        }
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.plan_id.is_empty() {
            return Err(SchedulerError::Validation("计划ID不能为空".to_string()));
        }
        if self.version.is_empty() {
            return Err(SchedulerError::Validation("计划版本不能为空".to_string()));
        }
        self.schedule_option.validate()?;

        let jobs: Vec<&JobInfo> = match &self.jobs {
            PlanJobs::Single(job) => vec![job],
            PlanJobs::Workflow(dag) => dag.nodes().iter().collect(),
        };
        for job in jobs {
            if job.executor_name.is_empty() {
                return Err(SchedulerError::Validation(format!(
                    "作业 {} 未指定执行器",
                    job.id
                )));
            }
        }
        Ok(())
    }
}

/// 计划，指向当前生效的版本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub current_version: String,
    pub recently_version: String,
    pub enabled: bool,
    /// 保存时按计划ID计算的槽位
    pub slot: u32,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(plan_id: &str, name: &str, version: &str, slot: u32) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            name: name.to_string(),
            current_version: version.to_string(),
            recently_version: version.to_string(),
            enabled: true,
            slot,
            next_trigger_at: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> PlanInfo {
        let mut a = JobInfo::new("a", JobType::Normal, "echo");
        a.children = vec!["b".to_string()];
        let b = JobInfo::new("b", JobType::Broadcast, "echo");
        PlanInfo {
            plan_id: "p1".to_string(),
            version: "v1".to_string(),
            name: "demo".to_string(),
            trigger_type: TriggerType::Schedule,
            schedule_option: ScheduleOption::fixed_rate(60),
            jobs: PlanJobs::Workflow(Dag::build(vec![a, b]).unwrap()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_plan_info_lookup() {
        let info = workflow();
        assert_eq!(info.plan_type(), PlanType::Workflow);
        assert!(info.job("b").is_some());
        assert!(info.job("z").is_none());
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_missing_executor_rejected() {
        let mut job = JobInfo::new("a", JobType::Normal, "");
        job.children.clear();
        let info = PlanInfo {
            jobs: PlanJobs::Single(job),
            ..workflow()
        };
        assert!(matches!(info.validate(), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn test_plan_info_json_round_trip() {
        let info = workflow();
        let json = serde_json::to_string(&info).unwrap();
        let parsed: PlanInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.plan_type(), PlanType::Workflow);
        let dag = parsed.dag().unwrap();
        assert_eq!(dag.len(), 2);
        assert_eq!(dag.successors("a")[0].id, "b");
    }

    #[test]
    fn test_job_info_defaults() {
        let job: JobInfo = serde_json::from_str(
            r#"{"id":"a","job_type":"MAP_REDUCE","executor_name":"wordcount"}"#,
        )
        .unwrap();
        assert_eq!(job.trigger_type, TriggerType::Schedule);
        assert!(job.terminate_with_fail);
        assert_eq!(job.dispatch_option.load_balance_type, LoadBalanceType::RoundRobin);
    }
}
