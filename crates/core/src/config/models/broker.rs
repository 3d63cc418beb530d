use serde::{Deserialize, Serialize};

/// 调度节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// 槽位总数，集群内各节点必须一致
    pub slot_size: u32,
    /// Worker心跳超时时间（秒）
    pub worker_heartbeat_timeout_seconds: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            host: "127.0.0.1".to_string(),
            port: 9785,
            slot_size: 1024,
            worker_heartbeat_timeout_seconds: 90,
        }
    }
}

/// 以主机名区分节点，取不到时使用固定ID
fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .map(|name| format!("broker-{name}"))
        .unwrap_or_else(|| "broker-001".to_string())
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.is_empty() {
            return Err(anyhow::anyhow!("节点ID不能为空"));
        }

        if self.host.is_empty() {
            return Err(anyhow::anyhow!("节点地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("节点端口必须大于0"));
        }

        if self.slot_size == 0 {
            return Err(anyhow::anyhow!("槽位数必须大于0"));
        }

        if self.worker_heartbeat_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("Worker心跳超时时间必须大于0"));
        }

        Ok(())
    }
}
