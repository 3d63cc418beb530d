use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use scheduler_core::AppConfig;
use scheduler_dispatcher::{Broker, BrokerDependencies, Repositories};
use scheduler_infrastructure::{
    HttpWorkerRpc, InMemoryJobInstanceRepository, InMemoryNodeRegistry,
    InMemoryPlanInstanceRepository, InMemoryPlanRepository, InMemoryTaskRepository,
    InMemoryWorkerRegistry, InMemoryWorkerStatistics,
};

/// 等待元任务结束的时长
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 单节点调度进程：内存仓储 + HTTP Worker 调用
pub struct Application {
    broker: Broker,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化调度节点 {} ({}:{})",
            config.broker.node_id, config.broker.host, config.broker.port
        );

        let rpc = HttpWorkerRpc::new(Duration::from_secs(config.dispatcher.rpc_timeout_seconds))
            .context("创建Worker HTTP客户端失败")?;
        let deps = BrokerDependencies {
            repositories: Repositories {
                plans: Arc::new(InMemoryPlanRepository::new()),
                plan_instances: Arc::new(InMemoryPlanInstanceRepository::new()),
                job_instances: Arc::new(InMemoryJobInstanceRepository::new()),
                tasks: Arc::new(InMemoryTaskRepository::new()),
            },
            workers: Arc::new(InMemoryWorkerRegistry::new()),
            statistics: Arc::new(InMemoryWorkerStatistics::new()),
            rpc: Arc::new(rpc),
            node_registry: Arc::new(InMemoryNodeRegistry::new()),
        };

        Ok(Self {
            broker: Broker::new(config, deps),
        })
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// 启动后一直运行到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.broker.start().await.context("启动调度节点失败")?;

        let _ = shutdown_rx.recv().await;
        info!("开始关闭调度节点");

        if let Err(e) = self.broker.shutdown(SHUTDOWN_TIMEOUT).await {
            error!("关闭调度节点出错: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownManager;

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let app = Arc::new(Application::new(AppConfig::default()).unwrap());
        let manager = ShutdownManager::new();
        let receiver = manager.subscribe().await;

        let runner = Arc::clone(&app);
        let handle = tokio::spawn(async move { runner.run(receiver).await });

        let watched = &app;
        let online = scheduler_testing_utils::TestEnv::wait_for(
            || async move { watched.broker().nodes().is_local_alive() },
            Duration::from_secs(2),
        )
        .await;
        assert!(online);

        manager.shutdown().await;
        handle.await.unwrap().unwrap();
        assert!(!app.broker().nodes().is_local_alive());
    }
}
