use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 调度集群中的节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerNode {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub online_at: DateTime<Utc>,
}

impl BrokerNode {
    pub fn new(node_id: &str, host: &str, port: u16) -> Self {
        Self {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
            online_at: Utc::now(),
        }
    }

    /// 节点在集群中的唯一地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn same_address(&self, other: &BrokerNode) -> bool {
        self.host == other.host && self.port == other.port
    }
}

/// 节点上下线事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Online(BrokerNode),
    Offline(BrokerNode),
}
