use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TagFilter;

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "RUNNING")]
    Running,
    /// 熔断中，暂不接收任务
    #[serde(rename = "FUSING")]
    Fusing,
    #[serde(rename = "TERMINATED")]
    Terminated,
}

/// Worker上注册的执行器
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerExecutor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Worker资源指标，由心跳上报
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerMetric {
    pub available_cpu: f64,
    /// 可用内存（GB）
    pub available_ram: f64,
    /// 任务队列剩余容量
    pub available_queue_limit: u32,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Default for WorkerMetric {
    fn default() -> Self {
        Self {
            available_cpu: 1.0,
            available_ram: 1.0,
            available_queue_limit: 64,
            last_heartbeat_at: Utc::now(),
        }
    }
}

/// Worker节点快照，选择策略只读使用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub worker_id: String,
    pub name: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub executors: Vec<WorkerExecutor>,
    #[serde(default)]
    pub tags: HashMap<String, Vec<String>>,
    pub status: WorkerStatus,
    pub metric: WorkerMetric,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(worker_id: &str, host: &str, port: u16) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            name: worker_id.to_string(),
            protocol: "http".to_string(),
            host: host.to_string(),
            port,
            executors: Vec::new(),
            tags: HashMap::new(),
            status: WorkerStatus::Running,
            metric: WorkerMetric::default(),
            registered_at: Utc::now(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == WorkerStatus::Running
    }

    /// 访问地址，格式 protocol://host:port
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn has_executor(&self, executor_name: &str) -> bool {
        self.executors.iter().any(|e| e.name == executor_name)
    }

    /// 标签过滤，所有过滤条件都需满足
    pub fn matches_tags(&self, filters: &[TagFilter]) -> bool {
        filters.iter().all(|filter| match self.tags.get(&filter.name) {
            Some(values) => {
                filter.values.is_empty() || filter.values.iter().any(|v| values.contains(v))
            }
            None => false,
        })
    }

    /// 是否还有余量接收任务
    pub fn has_available_resource(&self) -> bool {
        self.metric.available_queue_limit > 0
            && self.metric.available_cpu > 0.0
            && self.metric.available_ram > 0.0
    }

    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        now - self.metric.last_heartbeat_at > Duration::seconds(timeout_seconds)
    }
}
