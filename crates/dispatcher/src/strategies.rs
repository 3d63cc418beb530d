//! Worker选择策略
//!
//! 调用方负责先过滤掉不可用、能力不匹配的Worker，策略只在候选列表中挑选。
//! 候选列表为空时一律返回 `None`。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use scheduler_core::{LoadBalanceType, Worker};

/// 一次选择的上下文
#[derive(Debug, Clone, Default)]
pub struct SelectContext {
    /// 一致性哈希的键，通常为作业实例ID
    pub hash_key: String,
    pub appoint_worker_id: Option<String>,
    pub appoint_worker_url: Option<String>,
    /// 回看窗口内各Worker最近一次被下发的时间
    pub last_dispatched: HashMap<String, DateTime<Utc>>,
}

impl SelectContext {
    pub fn new(hash_key: &str) -> Self {
        Self {
            hash_key: hash_key.to_string(),
            ..Default::default()
        }
    }
}

pub trait WorkerSelector: Send + Sync {
    fn select(&self, context: &SelectContext, candidates: &[Worker]) -> Option<Worker>;

    fn name(&self) -> &str;
}

/// 轮询
pub struct RoundRobinSelector {
    counter: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelector for RoundRobinSelector {
    fn select(&self, _context: &SelectContext, candidates: &[Worker]) -> Option<Worker> {
        if candidates.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let selected = &candidates[index];
        // 选中的Worker已失效时不跳过，交由调用方重试
        if !selected.is_alive() {
            debug!("轮询选中的Worker {} 已失效", selected.worker_id);
            return None;
        }

        debug!(
            "轮询策略选择Worker: {} (索引: {}/{})",
            selected.worker_id,
            index,
            candidates.len()
        );
        Some(selected.clone())
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 随机
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelector for RandomSelector {
    fn select(&self, _context: &SelectContext, candidates: &[Worker]) -> Option<Worker> {
        if candidates.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }
        let index = rand::rng().random_range(0..candidates.len());
        Some(candidates[index].clone())
    }

    fn name(&self) -> &str {
        "Random"
    }
}

/// 权重来源
pub trait WeightSource: Send + Sync {
    /// 与候选列表一一对应的权重
    fn weights(&self, candidates: &[Worker]) -> Vec<f64>;
}

/// 以剩余队列容量作为权重
pub struct QueueCapacityWeight;

impl WeightSource for QueueCapacityWeight {
    fn weights(&self, candidates: &[Worker]) -> Vec<f64> {
        candidates
            .iter()
            .map(|w| w.metric.available_queue_limit as f64)
            .collect()
    }
}

/// 按权重随机，权重缺失或总和过小时退化为轮询
pub struct WeightedSelector {
    source: Arc<dyn WeightSource>,
    fallback: RoundRobinSelector,
}

impl WeightedSelector {
    pub fn new(source: Arc<dyn WeightSource>) -> Self {
        Self {
            source,
            fallback: RoundRobinSelector::new(),
        }
    }
}

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::new(Arc::new(QueueCapacityWeight))
    }
}

impl WorkerSelector for WeightedSelector {
    fn select(&self, context: &SelectContext, candidates: &[Worker]) -> Option<Worker> {
        if candidates.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }

        let weights = self.source.weights(candidates);
        let cumulative: Vec<f64> = weights
            .iter()
            .scan(0.0, |acc, w| {
                *acc += w.max(0.0);
                Some(*acc)
            })
            .collect();
        let total = cumulative.last().copied().unwrap_or(0.0);
        if total < 0.001 || cumulative.len() != candidates.len() {
            debug!("权重不可用，退化为轮询");
            return self.fallback.select(context, candidates);
        }

        let point = rand::rng().random::<f64>() * total;
        let index = cumulative
            .partition_point(|&w| w <= point)
            .min(candidates.len() - 1);
        let selected = &candidates[index];
        if !selected.is_alive() {
            return None;
        }
        Some(selected.clone())
    }

    fn name(&self) -> &str {
        "Weighted"
    }
}

/// 最近最少使用：优先选择回看窗口内未被下发过的Worker
pub struct LeastRecentlyUsedSelector;

impl LeastRecentlyUsedSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastRecentlyUsedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelector for LeastRecentlyUsedSelector {
    fn select(&self, context: &SelectContext, candidates: &[Worker]) -> Option<Worker> {
        if let Some(unused) = candidates
            .iter()
            .find(|w| !context.last_dispatched.contains_key(&w.worker_id))
        {
            return Some(unused.clone());
        }
        candidates
            .iter()
            .min_by_key(|w| context.last_dispatched.get(&w.worker_id))
            .cloned()
    }

    fn name(&self) -> &str {
        "LeastRecentlyUsed"
    }
}

/// 一致性哈希，每个Worker在环上放置固定数量的虚拟节点
pub struct ConsistentHashSelector {
    virtual_nodes: usize,
}

impl ConsistentHashSelector {
    pub const DEFAULT_VIRTUAL_NODES: usize = 160;

    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
        }
    }
}

impl Default for ConsistentHashSelector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VIRTUAL_NODES)
    }
}

impl WorkerSelector for ConsistentHashSelector {
    fn select(&self, context: &SelectContext, candidates: &[Worker]) -> Option<Worker> {
        let mut ring: BTreeMap<u32, usize> = BTreeMap::new();
        for (index, worker) in candidates.iter().enumerate() {
            for i in 0..self.virtual_nodes {
                let key = format!("{}#{}", worker.worker_id, i);
                ring.insert(crc32fast::hash(key.as_bytes()), index);
            }
        }

        let hash = crc32fast::hash(context.hash_key.as_bytes());
        let (_, &index) = ring.range(hash..).next().or_else(|| ring.iter().next())?;
        Some(candidates[index].clone())
    }

    fn name(&self) -> &str {
        "ConsistentHash"
    }
}

/// 指定Worker，按ID或地址匹配
pub struct AppointSelector;

impl AppointSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AppointSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelector for AppointSelector {
    fn select(&self, context: &SelectContext, candidates: &[Worker]) -> Option<Worker> {
        if let Some(worker_id) = &context.appoint_worker_id {
            return candidates.iter().find(|w| &w.worker_id == worker_id).cloned();
        }
        if let Some(url) = &context.appoint_worker_url {
            return candidates.iter().find(|w| &w.url() == url).cloned();
        }
        debug!("指定策略未配置Worker");
        None
    }

    fn name(&self) -> &str {
        "Appoint"
    }
}

/// 按负载均衡类型取选择策略
pub struct WorkerSelectorFactory {
    round_robin: RoundRobinSelector,
    random: RandomSelector,
    weighted: WeightedSelector,
    least_recently_used: LeastRecentlyUsedSelector,
    consistent_hash: ConsistentHashSelector,
    appoint: AppointSelector,
}

impl WorkerSelectorFactory {
    pub fn new(weight_source: Arc<dyn WeightSource>) -> Self {
        Self {
            round_robin: RoundRobinSelector::new(),
            random: RandomSelector::new(),
            weighted: WeightedSelector::new(weight_source),
            least_recently_used: LeastRecentlyUsedSelector::new(),
            consistent_hash: ConsistentHashSelector::default(),
            appoint: AppointSelector::new(),
        }
    }

    pub fn get(&self, load_balance_type: LoadBalanceType) -> &dyn WorkerSelector {
        match load_balance_type {
            LoadBalanceType::RoundRobin => &self.round_robin,
            LoadBalanceType::Random => &self.random,
            LoadBalanceType::Weighted => &self.weighted,
            LoadBalanceType::LeastRecentlyUsed => &self.least_recently_used,
            LoadBalanceType::ConsistentHash => &self.consistent_hash,
            LoadBalanceType::Appoint => &self.appoint,
        }
    }
}

impl Default for WorkerSelectorFactory {
    fn default() -> Self {
        Self::new(Arc::new(QueueCapacityWeight))
    }
}
