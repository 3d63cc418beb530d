//! 集群成员与槽位划分
//!
//! 固定数量的槽位按存活调度节点划分，计划按ID哈希落到槽位上，
//! 只有持有该槽位的节点才会加载并触发计划。成员变化时整体替换快照并重新划分，
//! 读取方始终看到完整的一份快照。

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use scheduler_core::{BrokerNode, NodeEvent, NodeRegistry, SchedulerResult};

/// 计划ID所属槽位，各节点计算结果一致
pub fn slot_of(plan_id: &str, slot_size: u32) -> u32 {
    crc32fast::hash(plan_id.as_bytes()) % slot_size.max(1)
}

/// 槽位管理
pub struct SlotManager {
    local: BrokerNode,
    slot_size: u32,
    owned: RwLock<Arc<BTreeSet<u32>>>,
}

impl SlotManager {
    pub fn new(local: BrokerNode, slot_size: u32) -> Self {
        Self {
            local,
            slot_size: slot_size.max(1),
            owned: RwLock::new(Arc::new(BTreeSet::new())),
        }
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    pub fn slot(&self, plan_id: &str) -> u32 {
        slot_of(plan_id, self.slot_size)
    }

    /// 按 (host, port) 排序后，第 i 个节点持有 i, i+n, i+2n ... 号槽位
    pub fn rehash(&self, nodes: &[BrokerNode]) {
        let mut sorted: Vec<&BrokerNode> = nodes.iter().collect();
        sorted.sort_by(|a, b| (a.host.as_str(), a.port).cmp(&(b.host.as_str(), b.port)));

        let owned: BTreeSet<u32> = match sorted.iter().position(|n| n.same_address(&self.local)) {
            Some(index) => (index as u32..self.slot_size)
                .step_by(sorted.len())
                .collect(),
            None => {
                warn!(
                    "本节点 {} 不在存活节点列表中，不持有任何槽位",
                    self.local.address()
                );
                BTreeSet::new()
            }
        };

        info!(
            "槽位重新划分完成: 存活节点 {} 个，本节点持有 {} 个槽位",
            sorted.len(),
            owned.len()
        );
        *self.owned.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(owned);
    }

    pub fn owns(&self, slot: u32) -> bool {
        self.snapshot().contains(&slot)
    }

    pub fn owns_plan(&self, plan_id: &str) -> bool {
        self.owns(self.slot(plan_id))
    }

    pub fn owned_slots(&self) -> Vec<u32> {
        self.snapshot().iter().copied().collect()
    }

    fn snapshot(&self) -> Arc<BTreeSet<u32>> {
        self.owned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// 调度节点管理，订阅注册中心的上下线事件维护存活节点快照
pub struct NodeManager {
    local: BrokerNode,
    registry: Arc<dyn NodeRegistry>,
    slots: Arc<SlotManager>,
    nodes: RwLock<Arc<Vec<BrokerNode>>>,
    running: Arc<tokio::sync::RwLock<bool>>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NodeManager {
    pub fn new(local: BrokerNode, registry: Arc<dyn NodeRegistry>, slots: Arc<SlotManager>) -> Self {
        Self {
            local,
            registry,
            slots,
            nodes: RwLock::new(Arc::new(Vec::new())),
            running: Arc::new(tokio::sync::RwLock::new(false)),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    /// 注册本节点，加载存活节点并开始监听成员变化
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        let events = self.registry.subscribe();
        self.registry.register(self.local.clone()).await?;
        self.refresh().await?;

        *self.running.write().await = true;
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.listen(events).await });
        *self.listener.lock().await = Some(handle);

        info!("节点 {} 已上线", self.local.node_id);
        Ok(())
    }

    pub async fn stop(&self) -> SchedulerResult<()> {
        *self.running.write().await = false;
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        self.registry.unregister(&self.local.node_id).await?;
        self.replace(Vec::new());
        info!("节点 {} 已下线", self.local.node_id);
        Ok(())
    }

    pub fn local(&self) -> &BrokerNode {
        &self.local
    }

    pub fn alive_nodes(&self) -> Arc<Vec<BrokerNode>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_alive(&self, node_id: &str) -> bool {
        self.alive_nodes().iter().any(|n| n.node_id == node_id)
    }

    pub fn is_local_alive(&self) -> bool {
        self.is_alive(&self.local.node_id)
    }

    /// 按键哈希选出一个存活节点
    pub fn elect(&self, key: &str) -> Option<BrokerNode> {
        let nodes = self.alive_nodes();
        if nodes.is_empty() {
            return None;
        }
        let index = crc32fast::hash(key.as_bytes()) as usize % nodes.len();
        nodes.get(index).cloned()
    }

    /// 处理单个成员事件
    pub fn on_event(&self, event: NodeEvent) {
        let mut nodes: Vec<BrokerNode> = self.alive_nodes().as_ref().clone();
        match event {
            NodeEvent::Online(node) => {
                debug!("节点上线: {} ({})", node.node_id, node.address());
                if nodes.iter().any(|n| n.node_id == node.node_id) {
                    return;
                }
                nodes.push(node);
            }
            NodeEvent::Offline(node) => {
                debug!("节点下线: {} ({})", node.node_id, node.address());
                let before = nodes.len();
                nodes.retain(|n| n.node_id != node.node_id);
                if nodes.len() == before {
                    return;
                }
            }
        }
        self.replace(nodes);
    }

    async fn refresh(&self) -> SchedulerResult<()> {
        let nodes = self.registry.alive_nodes().await?;
        self.replace(nodes);
        Ok(())
    }

    fn replace(&self, mut nodes: Vec<BrokerNode>) {
        nodes.sort_by(|a, b| (a.host.as_str(), a.port).cmp(&(b.host.as_str(), b.port)));
        self.slots.rehash(&nodes);
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(nodes);
    }

    async fn listen(&self, mut events: broadcast::Receiver<NodeEvent>) {
        loop {
            if !*self.running.read().await {
                break;
            }
            match events.recv().await {
                Ok(event) => self.on_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("节点事件积压，跳过 {} 条，重新加载存活节点", skipped);
                    if let Err(e) = self.refresh().await {
                        error!("重新加载存活节点失败: {}", e);
                    }
                }
                Err(RecvError::Closed) => {
                    info!("节点事件通道已关闭，停止监听");
                    break;
                }
            }
        }
    }
}
