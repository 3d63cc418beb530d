use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use scheduler_core::{SchedulerError, SchedulerResult, Task, Worker, WorkerRpc};

#[derive(Debug, Deserialize)]
struct TaskSubmitResponse {
    accepted: bool,
}

/// 基于HTTP的Worker调用，任务以JSON形式提交到 `{worker_url}/api/v1/tasks`
#[derive(Debug, Clone)]
pub struct HttpWorkerRpc {
    client: reqwest::Client,
}

impl HttpWorkerRpc {
    pub fn new(timeout: Duration) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkerRpc for HttpWorkerRpc {
    async fn send_task(&self, worker: &Worker, task: &Task) -> SchedulerResult<bool> {
        let url = format!("{}/api/v1/tasks", worker.url());
        debug!("下发任务 {} 到 {}", task.task_id, url);

        let response = self
            .client
            .post(&url)
            .json(task)
            .send()
            .await
            .map_err(|e| SchedulerError::Dispatch {
                worker_id: worker.worker_id.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            warn!(
                "Worker {} 拒绝任务 {}: HTTP {}",
                worker.worker_id,
                task.task_id,
                response.status()
            );
            return Ok(false);
        }

        match response.json::<TaskSubmitResponse>().await {
            Ok(body) => Ok(body.accepted),
            Err(e) => {
                warn!("解析Worker {} 响应失败: {}", worker.worker_id, e);
                Ok(false)
            }
        }
    }
}
