//! 可编排应答的 Worker RPC 替身
//!
//! 每个Worker可单独设定应答方式，未设定时使用默认应答；
//! 所有调用按顺序记录，便于断言下发次数与目标。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult, Task, Worker, WorkerRpc};

/// 单次下发的应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcReply {
    Accept,
    Reject,
    /// 模拟传输失败
    Error,
}

/// 一次下发记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCall {
    pub worker_id: String,
    pub task_id: String,
}

#[derive(Debug, Clone)]
pub struct MockWorkerRpc {
    default_reply: Arc<Mutex<RpcReply>>,
    replies: Arc<Mutex<HashMap<String, RpcReply>>>,
    calls: Arc<Mutex<Vec<DispatchCall>>>,
    latency: Arc<Mutex<Duration>>,
}

impl MockWorkerRpc {
    /// 默认全部接收
    pub fn new() -> Self {
        Self::with_default(RpcReply::Accept)
    }

    pub fn with_default(reply: RpcReply) -> Self {
        Self {
            default_reply: Arc::new(Mutex::new(reply)),
            replies: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn set_default(&self, reply: RpcReply) {
        *self.default_reply.lock().unwrap() = reply;
    }

    /// 每次下发在应答前等待的时长
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// 设定指定Worker的应答
    pub fn reply_for(&self, worker_id: &str, reply: RpcReply) {
        self.replies
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 某个任务被尝试下发的Worker序列
    pub fn workers_tried(&self, task_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .map(|c| c.worker_id.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Default for MockWorkerRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRpc for MockWorkerRpc {
    async fn send_task(&self, worker: &Worker, task: &Task) -> SchedulerResult<bool> {
        self.calls.lock().unwrap().push(DispatchCall {
            worker_id: worker.worker_id.clone(),
            task_id: task.task_id.clone(),
        });

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&worker.worker_id)
            .copied()
            .unwrap_or(*self.default_reply.lock().unwrap());

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match reply {
            RpcReply::Accept => Ok(true),
            RpcReply::Reject => Ok(false),
            RpcReply::Error => Err(SchedulerError::Dispatch {
                worker_id: worker.worker_id.clone(),
                message: "connection refused".to_string(),
            }),
        }
    }
}
