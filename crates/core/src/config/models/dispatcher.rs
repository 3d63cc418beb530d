use serde::{Deserialize, Serialize};

/// 任务下发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 单个任务最多尝试下发的次数
    pub max_dispatch_attempts: u32,
    /// 同时进行的下发数上限
    pub max_concurrent_dispatches: usize,
    /// LRU策略统计回看窗口（秒），非正数时使用默认的10分钟
    pub lru_lookback_seconds: i64,
    /// 单次RPC超时时间（秒）
    pub rpc_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_dispatch_attempts: 3,
            max_concurrent_dispatches: 100,
            lru_lookback_seconds: 600,
            rpc_timeout_seconds: 5,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_dispatch_attempts == 0 {
            return Err(anyhow::anyhow!("最大下发次数必须大于0"));
        }

        if self.max_concurrent_dispatches == 0 {
            return Err(anyhow::anyhow!("最大并发下发数必须大于0"));
        }

        if self.rpc_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("RPC超时时间必须大于0"));
        }

        Ok(())
    }
}
